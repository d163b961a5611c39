//! Error types shared across the coprocessor pipeline.

use thiserror::Error;

/// Details of the lock that blocked a snapshot read.
///
/// Returned verbatim to the caller so it can resolve the lock and retry the
/// request; nothing in this crate acts on it beyond surfacing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockInfo {
    /// Key the lock was found on.
    pub key: Vec<u8>,
    /// Primary key of the locking transaction.
    pub primary: Vec<u8>,
    /// Start timestamp of the locking transaction.
    pub lock_ts: u64,
    /// Lock TTL in milliseconds.
    pub ttl_ms: u64,
}

/// Unified error type for coprocessor execution.
///
/// Callers dispatch on the variant: `Locked` is retried after lock
/// resolution, the decode family signals corruption or a schema mismatch,
/// `Cancelled` means the request context was torn down, and `NonStreamable`
/// is a programmer error in the frame layer. Nothing is retried internally;
/// an error discards any buffered rows and terminates the pipeline.
#[derive(Debug, Error)]
pub enum CoprError {
    /// A range lock at or before the snapshot timestamp blocks this read.
    #[error("key {:?} locked by transaction at ts {}", .0.key, .0.lock_ts)]
    Locked(LockInfo),

    /// Storage engine failure underneath a read.
    #[error("storage: {0}")]
    Storage(String),

    /// A value datum could not be decoded.
    #[error("datum decode: {0}")]
    DecodeDatum(String),

    /// A row payload could not be decoded.
    #[error("row decode: {0}")]
    DecodeRow(String),

    /// A record or index key was malformed.
    #[error("key decode: {0}")]
    DecodeKey(String),

    /// A handle could not be recovered from a key or value tail.
    #[error("handle decode: {0}")]
    DecodeHandle(String),

    /// A NOT NULL column has neither a stored value nor a default.
    #[error("missing column {0}")]
    MissingColumn(i64),

    /// Expression evaluation failed.
    #[error("expression eval: {0}")]
    Eval(String),

    /// The request context was cancelled; the pipeline is terminal.
    #[error("request cancelled")]
    Cancelled,

    /// A resume cursor was requested from an operator that cannot stream.
    #[error("operator does not support streaming resume cursors")]
    NonStreamable,

    /// The operator tree shipped by the client is malformed.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

pub type Result<T> = std::result::Result<T, CoprError>;
