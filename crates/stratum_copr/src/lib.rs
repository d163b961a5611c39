//! Pushdown query execution for the Stratum coprocessor.
//!
//! A client ships an operator tree (table scan, index scan, selection,
//! top-N, limit) together with key ranges and a snapshot timestamp; this
//! crate evaluates the tree next to the data, against a borrowed MVCC
//! snapshot reader, and streams encoded rows back to the frame layer. It
//! owns the scan engines, the row and index codec bridge, and the bounded
//! top-N heap; request framing, expression-free planning and the storage
//! engine itself live elsewhere in the store.
//!
//! The typical flow:
//!
//! ```
//! use stratum_copr::{
//!     build_pipeline, CancelToken, ColumnInfo, Datum, IsolationLevel, KeyRange, MemStore,
//!     PlanNode, PlanRequest, TableScanDef,
//! };
//! use stratum_copr::{keys, row};
//!
//! let store = MemStore::new();
//! store.put(
//!     &keys::encode_record_key(1, 7),
//!     &row::encode_row(&[(1, Datum::Int(9))]),
//!     5,
//! );
//!
//! let req = PlanRequest {
//!     nodes: vec![PlanNode::TableScan(TableScanDef {
//!         table_id: 1,
//!         columns: vec![ColumnInfo::new(1)],
//!         desc: false,
//!     })],
//!     ranges: vec![KeyRange::point(keys::encode_record_key(1, 7))],
//!     snapshot_ts: 10,
//!     isolation: IsolationLevel::Si,
//!     ignore_lock: false,
//! };
//!
//! let mut exec = build_pipeline(&req, &store, CancelToken::new()).unwrap();
//! let row = exec.next().unwrap().unwrap();
//! assert_eq!(row[0], Datum::Int(9).encode());
//! assert!(exec.next().unwrap().is_none());
//! ```

pub mod datum;
pub mod error;
pub mod exec;
pub mod expr;
pub mod keys;
pub mod plan;
pub mod reader;
pub mod row;

pub use datum::Datum;
pub use error::{CoprError, LockInfo, Result};
pub use exec::{
    CancelToken, Executor, IndexScanExec, IsolationLevel, LimitExec, PkStatus, Row,
    SelectionExec, TableScanExec, TopNExec, DEFAULT_SCAN_BATCH,
};
pub use expr::{CmpOp, Expr, OrderBy};
pub use keys::KeyRange;
pub use plan::{
    build_pipeline, IndexScanDef, LimitDef, PlanNode, PlanRequest, SelectionDef, TableScanDef,
    TopNDef,
};
pub use reader::{MemStore, SnapshotReader};
pub use row::{ColumnInfo, EXTRA_HANDLE_ID};
