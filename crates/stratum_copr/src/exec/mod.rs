//! The pull-based operator pipeline.
//!
//! A request's operator tree is a chain from root down to a single scan
//! leaf. Every operator
//! answers `next()` by pulling from its single source; leaves pull bytes
//! from the snapshot reader. Execution is synchronous and single-threaded
//! per request, and all operator state survives between pulls so the frame
//! layer can suspend a pipeline indefinitely between partial responses.
//!
//! Operators are a tagged variant rather than trait objects: the tree shape
//! is closed, dispatch stays monomorphic, and the IR serializes without a
//! registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoprError, Result};

pub mod index_scan;
pub mod limit;
pub mod selection;
pub mod table_scan;
pub mod top_n;

pub use index_scan::{IndexScanExec, PkStatus};
pub use limit::LimitExec;
pub use selection::SelectionExec;
pub use table_scan::TableScanExec;
pub use top_n::TopNExec;

/// One output row: per-column encoded datum blobs.
pub type Row = Vec<Vec<u8>>;

/// Rows fetched per storage scan call.
pub const DEFAULT_SCAN_BATCH: usize = 128;

/// Scan batch size, overridable through `STRATUM_COPR_SCAN_BATCH`.
pub(crate) fn configured_scan_batch() -> usize {
    std::env::var("STRATUM_COPR_SCAN_BATCH")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_SCAN_BATCH)
}

/// Isolation level of the reading transaction.
///
/// Snapshot-isolated reads respect range locks; read-committed reads do not
/// wait on locks at all, so the lock check is skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    #[default]
    Si,
    Rc,
}

/// Cooperative cancellation flag shared by every operator of one request.
///
/// Observed at each `next()` entry and between storage calls. Once a pull
/// has returned `Cancelled` the pipeline is terminal.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CoprError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A node of the executor chain.
#[derive(Debug)]
pub enum Executor<'a> {
    TableScan(TableScanExec<'a>),
    IndexScan(IndexScanExec<'a>),
    Selection(SelectionExec<'a>),
    TopN(TopNExec<'a>),
    Limit(LimitExec<'a>),
}

impl<'a> Executor<'a> {
    /// Pull one row. `Ok(None)` is end-of-stream and sticky: once returned,
    /// no later pull yields a row.
    pub fn next(&mut self) -> Result<Option<Row>> {
        match self {
            Executor::TableScan(e) => e.next(),
            Executor::IndexScan(e) => e.next(),
            Executor::Selection(e) => e.next(),
            Executor::TopN(e) => e.next(),
            Executor::Limit(e) => e.next(),
        }
    }

    /// The next key this pipeline would read, plus the descending flag. The
    /// frame layer records it between partial responses so a scan can resume
    /// without re-running lock checks or re-emitting rows.
    pub fn cursor(&self) -> Result<(Vec<u8>, bool)> {
        match self {
            Executor::TableScan(e) => Ok(e.cursor()),
            Executor::IndexScan(e) => Ok(e.cursor()),
            Executor::Selection(e) => e.src().cursor(),
            Executor::TopN(_) => Err(CoprError::NonStreamable),
            Executor::Limit(e) => e.src().cursor(),
        }
    }

    /// Link `src` as this operator's source. Leaves store but never consult
    /// a source.
    pub fn set_src(&mut self, src: Executor<'a>) {
        match self {
            Executor::TableScan(e) => e.set_src(src),
            Executor::IndexScan(e) => e.set_src(src),
            Executor::Selection(e) => e.set_src(src),
            Executor::TopN(e) => e.set_src(src),
            Executor::Limit(e) => e.set_src(src),
        }
    }

    pub fn src(&self) -> Option<&Executor<'a>> {
        match self {
            Executor::TableScan(e) => e.src(),
            Executor::IndexScan(e) => e.src(),
            Executor::Selection(e) => Some(e.src()),
            Executor::TopN(e) => Some(e.src()),
            Executor::Limit(e) => Some(e.src()),
        }
    }

    /// Re-base the per-range row counters at the current range. Non-leaf
    /// operators delegate to their source.
    pub fn reset_counts(&mut self) {
        match self {
            Executor::TableScan(e) => e.reset_counts(),
            Executor::IndexScan(e) => e.reset_counts(),
            Executor::Selection(e) => e.src_mut().reset_counts(),
            Executor::TopN(e) => e.src_mut().reset_counts(),
            Executor::Limit(e) => e.src_mut().reset_counts(),
        }
    }

    /// Per-range row counters for the ranges visited since the last reset,
    /// including a partially consumed range while one is held open.
    pub fn counts(&self) -> &[i64] {
        match self {
            Executor::TableScan(e) => e.counts(),
            Executor::IndexScan(e) => e.counts(),
            Executor::Selection(e) => e.src().counts(),
            Executor::TopN(e) => e.src().counts(),
            Executor::Limit(e) => e.src().counts(),
        }
    }
}
