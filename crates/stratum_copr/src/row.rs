//! Row payload codec and output-row assembly.
//!
//! A stored row value is an id-tagged sequence of column datums:
//!
//! ```text
//! row value = version (0x01) || flags || column_count (BE u16) ||
//!             repeat: col_id (BE i64) || len (BE u32) || datum bytes
//! ```
//!
//! Rows are sparse. Columns absent from the payload fall back to the scan's
//! declared defaults when the output row is assembled, so the payload only
//! carries what was actually written.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::datum::{Datum, NIL_FLAG};
use crate::error::{CoprError, Result};

pub const ROW_FORMAT_VERSION: u8 = 0x01;
pub const ROW_FLAG_TOMBSTONE: u8 = 0x01;

/// Column id of the synthetic handle column a client may ask for when the
/// table has no integer primary key of its own.
pub const EXTRA_HANDLE_ID: i64 = -1;

/// Per-scan output column metadata shipped with the request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_id: i64,
    /// The column (and, for a pk-handle column, the handle) is unsigned.
    pub unsigned: bool,
    pub not_null: bool,
    /// This column's value is the handle embedded in the record key rather
    /// than part of the stored payload.
    pub pk_handle: bool,
    /// Encoded default datum; empty when the column has no default.
    pub default_val: Vec<u8>,
}

impl ColumnInfo {
    pub fn new(column_id: i64) -> Self {
        Self {
            column_id,
            ..Default::default()
        }
    }
}

/// Encode a row payload from `(column_id, datum)` pairs.
pub fn encode_row(cols: &[(i64, Datum)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + cols.len() * 16);
    out.push(ROW_FORMAT_VERSION);
    out.push(0);
    out.extend_from_slice(&(cols.len() as u16).to_be_bytes());
    for (col_id, datum) in cols {
        out.extend_from_slice(&col_id.to_be_bytes());
        let blob = datum.encode();
        out.extend_from_slice(&(blob.len() as u32).to_be_bytes());
        out.extend_from_slice(&blob);
    }
    out
}

/// Cut a row payload into per-output-offset datum blobs.
///
/// `col_ids` maps column id to output offset; payload columns the scan did
/// not ask for are skipped. The result holds `None` at offsets the payload
/// did not provide.
pub fn cut_row(value: &[u8], col_ids: &HashMap<i64, usize>) -> Result<Vec<Option<Vec<u8>>>> {
    let mut out = vec![None; col_ids.len()];
    let mut cursor = 0usize;

    let version = read_u8(value, &mut cursor)?;
    if version != ROW_FORMAT_VERSION {
        return Err(CoprError::DecodeRow(format!(
            "unsupported row format version {version}"
        )));
    }
    let flags = read_u8(value, &mut cursor)?;
    if flags & ROW_FLAG_TOMBSTONE != 0 {
        // Tombstoned payloads carry no columns. The MVCC layer normally
        // expresses deletion as versioned absence, so this is defensive.
        return Ok(out);
    }

    let count = read_u16(value, &mut cursor)? as usize;
    for _ in 0..count {
        let col_id = read_i64(value, &mut cursor)?;
        let len = read_u32(value, &mut cursor)? as usize;
        let blob = read_bytes(value, &mut cursor, len)?;
        if let Some(&offset) = col_ids.get(&col_id) {
            out[offset] = Some(blob.to_vec());
        }
    }
    Ok(out)
}

/// Assemble the final output row for a record.
///
/// The handle column always comes from the key, even when the payload holds
/// a stale copy. Remaining columns take the stored value, then the declared
/// default, then NULL; a NOT NULL column with neither fails the scan.
pub fn fill_row(
    columns: &[ColumnInfo],
    col_ids: &HashMap<i64, usize>,
    handle: i64,
    value: &[u8],
) -> Result<Vec<Vec<u8>>> {
    let mut values = cut_row(value, col_ids)?;

    for col in columns {
        let offset = offset_of(col_ids, col.column_id)?;
        if col.pk_handle || col.column_id == EXTRA_HANDLE_ID {
            let datum = if col.unsigned {
                Datum::Uint(handle as u64)
            } else {
                Datum::Int(handle)
            };
            values[offset] = Some(datum.encode());
            continue;
        }
        if values[offset].is_some() {
            continue;
        }
        if !col.default_val.is_empty() {
            values[offset] = Some(col.default_val.clone());
            continue;
        }
        if col.not_null {
            return Err(CoprError::MissingColumn(col.column_id));
        }
        values[offset] = Some(vec![NIL_FLAG]);
    }

    let mut out = Vec::with_capacity(values.len());
    for (offset, value) in values.into_iter().enumerate() {
        match value {
            Some(blob) => out.push(blob),
            None => {
                return Err(CoprError::DecodeRow(format!(
                    "no declared column for output offset {offset}"
                )));
            }
        }
    }
    Ok(out)
}

fn offset_of(col_ids: &HashMap<i64, usize>, col_id: i64) -> Result<usize> {
    col_ids.get(&col_id).copied().ok_or_else(|| {
        CoprError::DecodeRow(format!("column {col_id} missing from offset map"))
    })
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    Ok(read_bytes(bytes, cursor, 1)?[0])
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    let slice = read_bytes(bytes, cursor, 2)?;
    let mut out = [0u8; 2];
    out.copy_from_slice(slice);
    Ok(u16::from_be_bytes(out))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = read_bytes(bytes, cursor, 4)?;
    let mut out = [0u8; 4];
    out.copy_from_slice(slice);
    Ok(u32::from_be_bytes(out))
}

fn read_i64(bytes: &[u8], cursor: &mut usize) -> Result<i64> {
    let slice = read_bytes(bytes, cursor, 8)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(slice);
    Ok(i64::from_be_bytes(out))
}

fn read_bytes<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor.saturating_add(len);
    if end > bytes.len() {
        return Err(CoprError::DecodeRow(format!(
            "row payload underflow: need {len} bytes at offset {cursor}, total {}",
            bytes.len()
        )));
    }
    let out = &bytes[*cursor..end];
    *cursor = end;
    Ok(out)
}
