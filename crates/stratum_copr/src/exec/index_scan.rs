//! Index keyspace scan.
//!
//! Index entries carry their column values inside the key, so decoding cuts
//! the key into segments instead of reading a row payload. The handle rides
//! either in the key tail (non-unique indexes) or in the stored value
//! (unique indexes), and only a unique index may treat a point range as a
//! single-key lookup: under a non-unique index the handle tail means many
//! entries can share the point's prefix.

use std::fmt;

use tracing::{debug, trace};

use crate::datum::Datum;
use crate::error::Result;
use crate::exec::{CancelToken, Executor, IsolationLevel, Row};
use crate::keys::{self, KeyRange};
use crate::reader::SnapshotReader;

/// Whether the indexed table's integer primary key appears in index rows,
/// and how the handle is signed when it does. Three-state so that "no pk
/// column" stays distinct from an unset default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkStatus {
    NotExists,
    Signed,
    Unsigned,
}

pub struct IndexScanExec<'a> {
    reader: &'a dyn SnapshotReader,
    ranges: Vec<KeyRange>,
    start_ts: u64,
    isolation: IsolationLevel,
    cols_len: usize,
    pk_status: PkStatus,
    desc: bool,
    unique: bool,
    ignore_lock: bool,
    lock_checked: bool,
    batch_size: usize,
    range_cursor: usize,
    seek_key: Option<Vec<u8>>,
    rows: Vec<Row>,
    row_cursor: usize,
    /// Range the current buffer was filled from; a refill never mixes
    /// ranges.
    buffer_range: usize,
    counts: Vec<i64>,
    counts_start: usize,
    cancel: CancelToken,
    src: Option<Box<Executor<'a>>>,
}

impl<'a> fmt::Debug for IndexScanExec<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexScanExec").finish_non_exhaustive()
    }
}

impl<'a> IndexScanExec<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: &'a dyn SnapshotReader,
        ranges: Vec<KeyRange>,
        start_ts: u64,
        isolation: IsolationLevel,
        cols_len: usize,
        pk_status: PkStatus,
        desc: bool,
        unique: bool,
        ignore_lock: bool,
        batch_size: usize,
        cancel: CancelToken,
    ) -> Self {
        let counts = vec![0; ranges.len()];
        Self {
            reader,
            ranges,
            start_ts,
            isolation,
            cols_len,
            pk_status,
            desc,
            unique,
            ignore_lock,
            lock_checked: false,
            batch_size,
            range_cursor: 0,
            seek_key: None,
            rows: Vec::new(),
            row_cursor: 0,
            buffer_range: 0,
            counts,
            counts_start: 0,
            cancel,
            src: None,
        }
    }

    pub fn set_src(&mut self, src: Executor<'a>) {
        self.src = Some(Box::new(src));
    }

    pub fn src(&self) -> Option<&Executor<'a>> {
        self.src.as_deref()
    }

    pub fn next(&mut self) -> Result<Option<Row>> {
        self.cancel.check()?;
        self.check_range_lock()?;
        loop {
            if self.row_cursor < self.rows.len() {
                let row = std::mem::take(&mut self.rows[self.row_cursor]);
                self.row_cursor += 1;
                self.counts[self.buffer_range] += 1;
                return Ok(Some(row));
            }
            self.row_cursor = 0;
            self.rows.clear();
            self.fill_rows()?;
            if self.rows.is_empty() {
                return Ok(None);
            }
        }
    }

    pub fn cursor(&self) -> (Vec<u8>, bool) {
        if let Some(seek) = &self.seek_key {
            if !seek.is_empty() {
                return (seek.clone(), self.desc);
            }
        }
        if let Some(ran) = self.ranges.get(self.range_cursor) {
            if self.unique && ran.is_point() {
                return (ran.start.clone(), self.desc);
            }
            let key = if self.desc { &ran.end } else { &ran.start };
            return (key.clone(), self.desc);
        }
        match self.ranges.last() {
            Some(ran) => {
                let key = if self.desc { &ran.start } else { &ran.end };
                (key.clone(), self.desc)
            }
            None => (Vec::new(), self.desc),
        }
    }

    pub fn reset_counts(&mut self) {
        self.counts_start = self.range_cursor;
        if let Some(slot) = self.counts.get_mut(self.counts_start) {
            *slot = 0;
        }
    }

    pub fn counts(&self) -> &[i64] {
        // Unlike the record scan, the in-progress range is only included
        // while the cursor still points inside the range list.
        if self.seek_key.is_none() || self.range_cursor == self.counts.len() {
            &self.counts[self.counts_start..self.range_cursor]
        } else {
            &self.counts[self.counts_start..=self.range_cursor]
        }
    }

    fn check_range_lock(&mut self) -> Result<()> {
        if self.lock_checked {
            return Ok(());
        }
        if !self.ignore_lock && self.isolation == IsolationLevel::Si {
            let reader = self.reader;
            for ran in &self.ranges {
                if let Err(err) = reader.check_range_lock(self.start_ts, &ran.start, &ran.end) {
                    debug!(start_ts = self.start_ts, error = %err, "index scan blocked by range lock");
                    return Err(err);
                }
            }
        }
        self.lock_checked = true;
        Ok(())
    }

    fn next_range(&mut self) {
        self.range_cursor += 1;
        self.seek_key = None;
    }

    fn fill_rows(&mut self) -> Result<()> {
        while self.range_cursor < self.ranges.len() {
            self.cancel.check()?;
            let filling = self.range_cursor;
            let ran = self.ranges[filling].clone();
            if self.unique && ran.is_point() {
                let res = self.fill_from_point(&ran);
                self.next_range();
                res?;
            } else {
                let res = self.fill_from_range(&ran);
                if self.rows.is_empty() {
                    self.next_range();
                }
                res?;
            }
            if !self.rows.is_empty() {
                self.buffer_range = filling;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Point lookup; valid only for unique indexes.
    fn fill_from_point(&mut self, ran: &KeyRange) -> Result<()> {
        let value = match self.reader.get(&ran.start, self.start_ts)? {
            Some(value) if !value.is_empty() => value,
            _ => return Ok(()),
        };
        let row = decode_index_kv(self.cols_len, self.pk_status, &ran.start, &value)?;
        self.rows.push(row);
        Ok(())
    }

    fn fill_from_range(&mut self, ran: &KeyRange) -> Result<()> {
        let desc_end = if self.desc {
            Some(match &self.seek_key {
                None => ran.end.clone(),
                Some(seek) => keys::prefix_next(seek),
            })
        } else {
            if self.seek_key.is_none() {
                self.seek_key = Some(ran.start.clone());
            }
            None
        };

        let reader = self.reader;
        let cols_len = self.cols_len;
        let pk_status = self.pk_status;
        let rows = &mut self.rows;
        let mut last_key: Option<Vec<u8>> = None;

        let mut scan_fn = |key: &[u8], value: &[u8]| -> Result<()> {
            let row = decode_index_kv(cols_len, pk_status, key, value)?;
            rows.push(row);
            last_key = Some(key.to_vec());
            Ok(())
        };

        match &desc_end {
            Some(end) => {
                reader.reverse_scan(&ran.start, end, self.batch_size, self.start_ts, &mut scan_fn)?
            }
            None => match &self.seek_key {
                Some(seek) => {
                    reader.scan(seek, &ran.end, self.batch_size, self.start_ts, &mut scan_fn)?
                }
                None => {}
            },
        }

        if let Some(last) = last_key {
            trace!(
                range = self.range_cursor,
                buffered = self.rows.len(),
                "index scan batch"
            );
            self.seek_key = if self.desc {
                Some(keys::prefix_prev(&last).unwrap_or_default())
            } else {
                Some(keys::prefix_next(&last))
            };
        }
        Ok(())
    }
}

/// Rebuild an output row from one index entry.
///
/// The key is cut into `cols_len` column segments. A non-empty remainder is
/// the handle datum and is appended as-is; an empty remainder sends us to
/// the value's trailing 8 bytes, re-encoded per the pk signedness.
fn decode_index_kv(
    cols_len: usize,
    pk_status: PkStatus,
    key: &[u8],
    value: &[u8],
) -> Result<Row> {
    let (mut values, remainder) = keys::cut_index_key(key, cols_len)?;
    if pk_status != PkStatus::NotExists {
        if !remainder.is_empty() {
            values.push(remainder.to_vec());
        } else {
            let handle = keys::decode_handle_from_value(value)?;
            let datum = match pk_status {
                PkStatus::Unsigned => Datum::Uint(handle as u64),
                _ => Datum::Int(handle),
            };
            values.push(datum.encode());
        }
    }
    Ok(values)
}
