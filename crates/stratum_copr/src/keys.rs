//! Key codec and range arithmetic.
//!
//! The Stratum data keyspace is laid out as
//!
//! ```text
//! record key = 0x74 || table_id (BE u64) || 0x72 || handle (sign-flipped BE i64)
//! index  key = 0x74 || table_id (BE u64) || 0x69 || index_id (BE u64) || datum... [|| handle datum]
//! ```
//!
//! Index keys carry their column values as self-delimiting value datums so a
//! key can be cut into segments without schema. Unique index keys stop after
//! the column datums and store the handle in the row value instead;
//! non-unique keys append the handle as a trailing Int datum.

use serde::{Deserialize, Serialize};

use crate::datum::{self, encode_i64_ordered};
use crate::error::{CoprError, Result};

pub const TABLE_PREFIX: u8 = 0x74;
pub const RECORD_MARKER: u8 = 0x72;
pub const INDEX_MARKER: u8 = 0x69;

pub const RECORD_KEY_LEN: usize = 1 + 8 + 1 + 8;
const INDEX_PREFIX_LEN: usize = 1 + 8 + 1 + 8;

pub fn encode_record_key(table_id: u64, handle: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_KEY_LEN);
    out.push(TABLE_PREFIX);
    out.extend_from_slice(&table_id.to_be_bytes());
    out.push(RECORD_MARKER);
    out.extend_from_slice(&encode_i64_ordered(handle));
    out
}

/// Recover the handle embedded in a record key.
pub fn decode_record_handle(key: &[u8]) -> Result<i64> {
    if key.len() != RECORD_KEY_LEN {
        return Err(CoprError::DecodeKey(format!(
            "record key has length {}, want {RECORD_KEY_LEN}",
            key.len()
        )));
    }
    if key[0] != TABLE_PREFIX || key[9] != RECORD_MARKER {
        return Err(CoprError::DecodeKey(
            "record key prefix or marker mismatch".into(),
        ));
    }
    let mut handle = [0u8; 8];
    handle.copy_from_slice(&key[10..18]);
    Ok(datum::decode_i64_ordered(handle))
}

pub fn index_key_prefix(table_id: u64, index_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(INDEX_PREFIX_LEN);
    out.push(TABLE_PREFIX);
    out.extend_from_slice(&table_id.to_be_bytes());
    out.push(INDEX_MARKER);
    out.extend_from_slice(&index_id.to_be_bytes());
    out
}

/// Build an index key from already-encoded column datums, optionally
/// followed by the handle datum for non-unique indexes.
pub fn encode_index_key(
    table_id: u64,
    index_id: u64,
    column_datums: &[Vec<u8>],
    handle_datum: Option<&[u8]>,
) -> Vec<u8> {
    let mut out = index_key_prefix(table_id, index_id);
    for blob in column_datums {
        out.extend_from_slice(blob);
    }
    if let Some(handle) = handle_datum {
        out.extend_from_slice(handle);
    }
    out
}

/// Cut an index key into `cols_len` column segments, returning the segments
/// and whatever follows them (the handle datum, or nothing).
pub fn cut_index_key(key: &[u8], cols_len: usize) -> Result<(Vec<Vec<u8>>, &[u8])> {
    if key.len() < INDEX_PREFIX_LEN || key[0] != TABLE_PREFIX || key[9] != INDEX_MARKER {
        return Err(CoprError::DecodeKey(
            "index key prefix or marker mismatch".into(),
        ));
    }
    let mut rest = &key[INDEX_PREFIX_LEN..];
    let mut segments = Vec::with_capacity(cols_len);
    for _ in 0..cols_len {
        let (blob, tail) = datum::split_first(rest)
            .map_err(|err| CoprError::DecodeKey(format!("index key column segment: {err}")))?;
        segments.push(blob.to_vec());
        rest = tail;
    }
    Ok((segments, rest))
}

/// Recover a handle from the trailing 8 bytes of a unique index value.
pub fn decode_handle_from_value(value: &[u8]) -> Result<i64> {
    if value.len() < 8 {
        return Err(CoprError::DecodeHandle(format!(
            "value holds {} bytes, want at least 8",
            value.len()
        )));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&value[value.len() - 8..]);
    Ok(i64::from_be_bytes(tail))
}

/// Encode the handle for storage in a unique index value.
pub fn encode_handle_value(handle: i64) -> Vec<u8> {
    handle.to_be_bytes().to_vec()
}

/// Lexicographic successor of `key`: increment trailing bytes with carry,
/// appending a zero byte when every byte carries.
pub fn prefix_next(key: &[u8]) -> Vec<u8> {
    let mut out = key.to_vec();
    for idx in (0..out.len()).rev() {
        out[idx] = out[idx].wrapping_add(1);
        if out[idx] != 0 {
            return out;
        }
    }
    out.copy_from_slice(key);
    out.push(0);
    out
}

/// Predecessor of `key` in a fixed-length keyspace: decrement right to left,
/// borrowing through zero bytes. `None` when the key is all zero, which has
/// no predecessor of the same length.
pub fn prefix_prev(key: &[u8]) -> Option<Vec<u8>> {
    let mut out = key.to_vec();
    for idx in (0..out.len()).rev() {
        out[idx] = out[idx].wrapping_sub(1);
        if out[idx] != 0xFF {
            return Some(out);
        }
    }
    None
}

/// A half-open key range `[start, end)`.
///
/// Ranges arriving with a request are non-overlapping and listed in visit
/// order: low to high for ascending scans, high to low for descending ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(start: Vec<u8>, end: Vec<u8>) -> Self {
        Self { start, end }
    }

    /// A range selecting at most the single key `start`.
    pub fn point(start: Vec<u8>) -> Self {
        let end = prefix_next(&start);
        Self { start, end }
    }

    pub fn is_point(&self) -> bool {
        self.end == prefix_next(&self.start)
    }
}
