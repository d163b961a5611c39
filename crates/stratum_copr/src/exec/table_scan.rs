//! Record keyspace scan.
//!
//! Visits the request's key ranges in order, turning stored row payloads
//! into output rows. Point ranges resolve through a single snapshot get;
//! everything else pulls batches through the reader's range scans, with a
//! per-range seek key carrying the resume position across batches.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace};

use crate::error::Result;
use crate::exec::{CancelToken, Executor, IsolationLevel, Row};
use crate::keys::{self, KeyRange};
use crate::reader::SnapshotReader;
use crate::row::{self, ColumnInfo};

pub struct TableScanExec<'a> {
    reader: &'a dyn SnapshotReader,
    ranges: Vec<KeyRange>,
    start_ts: u64,
    isolation: IsolationLevel,
    columns: Vec<ColumnInfo>,
    col_ids: HashMap<i64, usize>,
    desc: bool,
    ignore_lock: bool,
    lock_checked: bool,
    batch_size: usize,
    range_cursor: usize,
    seek_key: Option<Vec<u8>>,
    rows: Vec<Row>,
    row_cursor: usize,
    /// Index of the range the current buffer was filled from. A refill
    /// stops at the first range that yields rows, so the buffer never mixes
    /// ranges.
    buffer_range: usize,
    counts: Vec<i64>,
    counts_start: usize,
    cancel: CancelToken,
    src: Option<Box<Executor<'a>>>,
}

impl<'a> fmt::Debug for TableScanExec<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableScanExec").finish_non_exhaustive()
    }
}

impl<'a> TableScanExec<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: &'a dyn SnapshotReader,
        ranges: Vec<KeyRange>,
        start_ts: u64,
        isolation: IsolationLevel,
        columns: Vec<ColumnInfo>,
        col_ids: HashMap<i64, usize>,
        desc: bool,
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
            columns,
            col_ids,
            desc,
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
            if let Some(row) = self.take_buffered() {
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
            if ran.is_point() {
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
        if self.seek_key.is_none() {
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
                    debug!(start_ts = self.start_ts, error = %err, "table scan blocked by range lock");
                    return Err(err);
                }
            }
        }
        self.lock_checked = true;
        Ok(())
    }

    fn take_buffered(&mut self) -> Option<Row> {
        if self.row_cursor < self.rows.len() {
            let row = std::mem::take(&mut self.rows[self.row_cursor]);
            self.row_cursor += 1;
            Some(row)
        } else {
            None
        }
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
            if ran.is_point() {
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

    fn fill_from_point(&mut self, ran: &KeyRange) -> Result<()> {
        let value = match self.reader.get(&ran.start, self.start_ts)? {
            Some(value) if !value.is_empty() => value,
            _ => return Ok(()),
        };
        let handle = keys::decode_record_handle(&ran.start)?;
        let row = row::fill_row(&self.columns, &self.col_ids, handle, &value)?;
        self.rows.push(row);
        Ok(())
    }

    fn fill_from_range(&mut self, ran: &KeyRange) -> Result<()> {
        // Ascending scans store the next start key directly. Descending
        // scans store the inclusive upper bound of what is still unread, so
        // the exclusive end handed to the reader is one key past it.
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
        let columns = &self.columns;
        let col_ids = &self.col_ids;
        let rows = &mut self.rows;
        let mut last_key: Option<Vec<u8>> = None;

        let mut scan_fn = |key: &[u8], value: &[u8]| -> Result<()> {
            let handle = keys::decode_record_handle(key)?;
            let row = row::fill_row(columns, col_ids, handle, value)?;
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
                "table scan batch"
            );
            self.seek_key = if self.desc {
                // An all-zero key has no predecessor; the empty sentinel
                // drains the range on the next pull.
                Some(keys::prefix_prev(&last).unwrap_or_default())
            } else {
                Some(keys::prefix_next(&last))
            };
        }
        Ok(())
    }
}
