//! Value datum codec.
//!
//! Every column blob a scan emits is either the single NULL sentinel byte or
//! a flag-prefixed datum in the store's value encoding. Blobs are
//! self-delimiting, which is what lets index keys be cut into column
//! segments without consulting schema, and order-preserving under memcmp
//! within a flag class.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{CoprError, Result};

/// Flag byte of the NULL sentinel. A NULL column blob is exactly this byte.
pub const NIL_FLAG: u8 = 0x00;
/// Signed 64-bit integer, stored sign-flipped big-endian.
pub const INT_FLAG: u8 = 0x01;
/// Unsigned 64-bit integer, stored big-endian.
pub const UINT_FLAG: u8 = 0x02;
/// 64-bit float, stored in total-order encoding.
pub const FLOAT_FLAG: u8 = 0x03;
/// Raw bytes, stored with a 4-byte big-endian length prefix.
pub const BYTES_FLAG: u8 = 0x04;

const SIGN_FLIP_MASK: u64 = 1u64 << 63;

/// Flip the sign bit so that signed integers sort correctly under memcmp.
pub fn encode_i64_ordered(value: i64) -> [u8; 8] {
    (value as u64 ^ SIGN_FLIP_MASK).to_be_bytes()
}

pub fn decode_i64_ordered(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_FLIP_MASK) as i64
}

fn encode_f64_ordered(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    // Non-negative floats get the high bit set; negative floats are fully
    // inverted so that larger magnitudes sort lower.
    let ordered = if bits & SIGN_FLIP_MASK == 0 {
        bits | SIGN_FLIP_MASK
    } else {
        !bits
    };
    ordered.to_be_bytes()
}

fn decode_f64_ordered(bytes: [u8; 8]) -> f64 {
    let ordered = u64::from_be_bytes(bytes);
    let bits = if ordered & SIGN_FLIP_MASK != 0 {
        ordered ^ SIGN_FLIP_MASK
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

/// A decoded column value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Int(i64),
    Uint(u64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Datum::Null => out.push(NIL_FLAG),
            Datum::Int(v) => {
                out.push(INT_FLAG);
                out.extend_from_slice(&encode_i64_ordered(*v));
            }
            Datum::Uint(v) => {
                out.push(UINT_FLAG);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Float(v) => {
                out.push(FLOAT_FLAG);
                out.extend_from_slice(&encode_f64_ordered(*v));
            }
            Datum::Bytes(v) => {
                out.push(BYTES_FLAG);
                out.extend_from_slice(&(v.len() as u32).to_be_bytes());
                out.extend_from_slice(v);
            }
        }
    }

    /// Decode one datum from the front of `bytes`, returning the rest.
    pub fn decode(bytes: &[u8]) -> Result<(Datum, &[u8])> {
        let (blob, rest) = split_first(bytes)?;
        let datum = match blob[0] {
            NIL_FLAG => Datum::Null,
            INT_FLAG => Datum::Int(decode_i64_ordered(fixed8(&blob[1..]))),
            UINT_FLAG => Datum::Uint(u64::from_be_bytes(fixed8(&blob[1..]))),
            FLOAT_FLAG => Datum::Float(decode_f64_ordered(fixed8(&blob[1..]))),
            BYTES_FLAG => Datum::Bytes(blob[5..].to_vec()),
            flag => {
                return Err(CoprError::DecodeDatum(format!(
                    "unknown datum flag {flag:#04x}"
                )));
            }
        };
        Ok((datum, rest))
    }

    /// Total order used by top-N: NULL lowest, then numerics by value, then
    /// bytes in lexicographic order.
    pub fn cmp_order(&self, other: &Datum) -> Ordering {
        use Datum::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Int(a), Int(b)) => a.cmp(b),
            (Uint(a), Uint(b)) => a.cmp(b),
            (Int(a), Uint(b)) => cmp_i64_u64(*a, *b),
            (Uint(a), Int(b)) => cmp_i64_u64(*b, *a).reverse(),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),
            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Uint(b)) => a.total_cmp(&(*b as f64)),
            (Uint(a), Float(b)) => (*a as f64).total_cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Bytes(_), _) => Ordering::Greater,
            (_, Bytes(_)) => Ordering::Less,
        }
    }

    /// The store's boolean coercion. `None` for NULL; the row filter treats
    /// that as a rejection.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Datum::Null => None,
            Datum::Int(v) => Some(*v != 0),
            Datum::Uint(v) => Some(*v != 0),
            Datum::Float(v) => Some(*v != 0.0),
            Datum::Bytes(v) => Some(!v.is_empty()),
        }
    }
}

fn cmp_i64_u64(a: i64, b: u64) -> Ordering {
    if a < 0 {
        Ordering::Less
    } else {
        (a as u64).cmp(&b)
    }
}

fn fixed8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

/// Split the first datum blob off the front of `bytes` without decoding it.
pub fn split_first(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let Some(&flag) = bytes.first() else {
        return Err(CoprError::DecodeDatum("empty datum buffer".into()));
    };
    let len = match flag {
        NIL_FLAG => 1,
        INT_FLAG | UINT_FLAG | FLOAT_FLAG => 9,
        BYTES_FLAG => {
            if bytes.len() < 5 {
                return Err(CoprError::DecodeDatum(
                    "bytes datum truncated before length".into(),
                ));
            }
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&bytes[1..5]);
            5 + u32::from_be_bytes(len_bytes) as usize
        }
        flag => {
            return Err(CoprError::DecodeDatum(format!(
                "unknown datum flag {flag:#04x}"
            )));
        }
    };
    if bytes.len() < len {
        return Err(CoprError::DecodeDatum(format!(
            "datum truncated: need {len} bytes, have {}",
            bytes.len()
        )));
    }
    Ok(bytes.split_at(len))
}
