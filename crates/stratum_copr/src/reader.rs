//! Snapshot reader boundary and the in-memory reference engine.
//!
//! The pipeline consumes storage through `SnapshotReader`; the production
//! engine lives elsewhere in the store. `MemStore` implements the same
//! contract over a versioned in-process map and backs single-node embedders
//! and every test in this crate.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use tracing::warn;

use crate::error::{CoprError, LockInfo, Result};

/// Callback invoked per key/value pair during a range scan. The slices are
/// only valid for the duration of the call; implementations may reuse their
/// buffers, so anything kept must be copied.
pub type ScanFn<'a> = dyn FnMut(&[u8], &[u8]) -> Result<()> + 'a;

/// Snapshot-scoped read capability over the MVCC engine.
///
/// All reads resolve the newest version visible at the supplied timestamp.
/// `scan` and `reverse_scan` cover the half-open range `[start, end)`, in
/// ascending and descending key order respectively, invoking the callback at
/// most `limit` times; the callback may short-circuit by returning an error.
pub trait SnapshotReader {
    /// Point read. `None` (or an empty value) means not present at `ts`.
    fn get(&self, key: &[u8], ts: u64) -> Result<Option<Vec<u8>>>;

    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        ts: u64,
        f: &mut ScanFn<'_>,
    ) -> Result<()>;

    fn reverse_scan(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        ts: u64,
        f: &mut ScanFn<'_>,
    ) -> Result<()>;

    /// Fail with `Locked` if any lock in `[start, end)` blocks a read at
    /// `ts`, i.e. the lock's start timestamp is at or before `ts`.
    fn check_range_lock(&self, ts: u64, start: &[u8], end: &[u8]) -> Result<()>;
}

#[derive(Clone, Debug)]
struct VersionedValue {
    ts: u64,
    /// `None` is a tombstone.
    value: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
struct LockEntry {
    primary: Vec<u8>,
    lock_ts: u64,
    ttl_ms: u64,
}

/// In-memory MVCC store with per-key version chains and a lock table.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<VersionedValue>>>,
    locks: RwLock<BTreeMap<Vec<u8>, LockEntry>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` at `ts`. Writing the same `(key, ts)` twice overwrites
    /// in place; otherwise versions stay sorted by timestamp.
    pub fn put(&self, key: &[u8], value: &[u8], ts: u64) {
        self.insert_version(key, Some(value.to_vec()), ts);
    }

    /// Record a tombstone at `ts`.
    pub fn delete(&self, key: &[u8], ts: u64) {
        self.insert_version(key, None, ts);
    }

    fn insert_version(&self, key: &[u8], value: Option<Vec<u8>>, ts: u64) {
        let Ok(mut guard) = self.inner.write() else {
            warn!("mem store version map poisoned; dropping write");
            return;
        };
        let versions = guard.entry(key.to_vec()).or_default();
        match versions.binary_search_by(|v| v.ts.cmp(&ts)) {
            Ok(idx) => versions[idx].value = value,
            Err(idx) => versions.insert(idx, VersionedValue { ts, value }),
        }
    }

    /// Place a lock on `key` for the transaction starting at `lock_ts`.
    pub fn lock(&self, key: &[u8], primary: &[u8], lock_ts: u64, ttl_ms: u64) {
        let Ok(mut guard) = self.locks.write() else {
            warn!("mem store lock table poisoned; dropping lock");
            return;
        };
        guard.insert(
            key.to_vec(),
            LockEntry {
                primary: primary.to_vec(),
                lock_ts,
                ttl_ms,
            },
        );
    }

    pub fn unlock(&self, key: &[u8]) {
        if let Ok(mut guard) = self.locks.write() {
            guard.remove(key);
        }
    }
}

fn visible(versions: &[VersionedValue], ts: u64) -> Option<&Vec<u8>> {
    versions
        .iter()
        .rev()
        .find(|v| v.ts <= ts)
        .and_then(|v| v.value.as_ref())
}

fn poisoned(what: &str) -> CoprError {
    CoprError::Storage(format!("mem store {what} poisoned"))
}

impl SnapshotReader for MemStore {
    fn get(&self, key: &[u8], ts: u64) -> Result<Option<Vec<u8>>> {
        let guard = self.inner.read().map_err(|_| poisoned("version map"))?;
        Ok(guard
            .get(key)
            .and_then(|versions| visible(versions, ts).cloned()))
    }

    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        ts: u64,
        f: &mut ScanFn<'_>,
    ) -> Result<()> {
        if start >= end || limit == 0 {
            return Ok(());
        }
        let guard = self.inner.read().map_err(|_| poisoned("version map"))?;
        let mut emitted = 0usize;
        for (key, versions) in guard.range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
        {
            if let Some(value) = visible(versions, ts) {
                f(key.as_slice(), value.as_slice())?;
                emitted += 1;
                if emitted >= limit {
                    break;
                }
            }
        }
        Ok(())
    }

    fn reverse_scan(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        ts: u64,
        f: &mut ScanFn<'_>,
    ) -> Result<()> {
        if start >= end || limit == 0 {
            return Ok(());
        }
        let guard = self.inner.read().map_err(|_| poisoned("version map"))?;
        let mut emitted = 0usize;
        for (key, versions) in guard
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .rev()
        {
            if let Some(value) = visible(versions, ts) {
                f(key.as_slice(), value.as_slice())?;
                emitted += 1;
                if emitted >= limit {
                    break;
                }
            }
        }
        Ok(())
    }

    fn check_range_lock(&self, ts: u64, start: &[u8], end: &[u8]) -> Result<()> {
        if start >= end {
            return Ok(());
        }
        let guard = self.locks.read().map_err(|_| poisoned("lock table"))?;
        for (key, lock) in guard.range::<[u8], _>((Bound::Included(start), Bound::Excluded(end))) {
            if lock.lock_ts <= ts {
                return Err(CoprError::Locked(LockInfo {
                    key: key.clone(),
                    primary: lock.primary.clone(),
                    lock_ts: lock.lock_ts,
                    ttl_ms: lock.ttl_ms,
                }));
            }
        }
        Ok(())
    }
}
