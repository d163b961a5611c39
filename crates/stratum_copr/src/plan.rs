//! Operator IR and pipeline construction.
//!
//! The IR mirrors what the client ships in the coprocessor request payload:
//! a leaf-first list of operator nodes plus the key ranges, snapshot
//! timestamp and lock handling flags that apply to the whole request.
//! `build_pipeline` validates the tree shape and chains executors leaf to
//! root against a borrowed snapshot reader.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoprError, Result};
use crate::exec::{
    configured_scan_batch, CancelToken, Executor, IndexScanExec, IsolationLevel, LimitExec,
    PkStatus, SelectionExec, TableScanExec, TopNExec,
};
use crate::expr::{Expr, OrderBy};
use crate::keys::KeyRange;
use crate::reader::SnapshotReader;
use crate::row::{ColumnInfo, EXTRA_HANDLE_ID};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableScanDef {
    pub table_id: u64,
    pub columns: Vec<ColumnInfo>,
    pub desc: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexScanDef {
    pub table_id: u64,
    pub index_id: u64,
    /// Index columns in key order; a trailing pk-handle column (or a
    /// leading synthetic handle column) marks that index rows carry the
    /// table's handle.
    pub columns: Vec<ColumnInfo>,
    pub desc: bool,
    pub unique: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectionDef {
    pub conditions: Vec<Expr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopNDef {
    pub limit: u64,
    pub order_by: Vec<OrderBy>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitDef {
    pub limit: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PlanNode {
    TableScan(TableScanDef),
    IndexScan(IndexScanDef),
    Selection(SelectionDef),
    TopN(TopNDef),
    Limit(LimitDef),
}

impl PlanNode {
    fn name(&self) -> &'static str {
        match self {
            PlanNode::TableScan(_) => "table_scan",
            PlanNode::IndexScan(_) => "index_scan",
            PlanNode::Selection(_) => "selection",
            PlanNode::TopN(_) => "top_n",
            PlanNode::Limit(_) => "limit",
        }
    }
}

/// One coprocessor execution request, as decoded from the RPC payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanRequest {
    /// Operator chain, leaf first.
    pub nodes: Vec<PlanNode>,
    /// Pre-sorted, non-overlapping ranges for the leaf scan.
    pub ranges: Vec<KeyRange>,
    pub snapshot_ts: u64,
    pub isolation: IsolationLevel,
    pub ignore_lock: bool,
}

/// Validate the request and chain its executors against `reader`.
pub fn build_pipeline<'a>(
    req: &PlanRequest,
    reader: &'a dyn SnapshotReader,
    cancel: CancelToken,
) -> Result<Executor<'a>> {
    let Some((leaf, rest)) = req.nodes.split_first() else {
        return Err(CoprError::InvalidPlan("plan has no operators".into()));
    };
    let batch_size = configured_scan_batch();
    debug!(
        nodes = req.nodes.len(),
        ranges = req.ranges.len(),
        snapshot_ts = req.snapshot_ts,
        batch_size,
        "building coprocessor pipeline"
    );

    let (mut exec, row_width) = match leaf {
        PlanNode::TableScan(def) => {
            let col_ids = column_offsets(&def.columns)?;
            let exec = TableScanExec::new(
                reader,
                req.ranges.clone(),
                req.snapshot_ts,
                req.isolation,
                def.columns.clone(),
                col_ids,
                def.desc,
                req.ignore_lock,
                batch_size,
                cancel.clone(),
            );
            (Executor::TableScan(exec), def.columns.len())
        }
        PlanNode::IndexScan(def) => {
            let (cols_len, pk_status) = index_layout(&def.columns)?;
            let row_width = match pk_status {
                PkStatus::NotExists => cols_len,
                _ => cols_len + 1,
            };
            let exec = IndexScanExec::new(
                reader,
                req.ranges.clone(),
                req.snapshot_ts,
                req.isolation,
                cols_len,
                pk_status,
                def.desc,
                def.unique,
                req.ignore_lock,
                batch_size,
                cancel.clone(),
            );
            (Executor::IndexScan(exec), row_width)
        }
        other => {
            return Err(CoprError::InvalidPlan(format!(
                "plan must start with a scan, got {}",
                other.name()
            )));
        }
    };

    for node in rest {
        exec = match node {
            PlanNode::Selection(def) => {
                let related = related_offsets(def.conditions.iter(), row_width)?;
                Executor::Selection(SelectionExec::new(
                    def.conditions.clone(),
                    related,
                    row_width,
                    exec,
                    cancel.clone(),
                ))
            }
            PlanNode::TopN(def) => {
                let related =
                    related_offsets(def.order_by.iter().map(|item| &item.expr), row_width)?;
                Executor::TopN(TopNExec::new(
                    def.limit as usize,
                    def.order_by.clone(),
                    related,
                    row_width,
                    exec,
                    cancel.clone(),
                ))
            }
            PlanNode::Limit(def) => {
                Executor::Limit(LimitExec::new(def.limit, exec, cancel.clone()))
            }
            PlanNode::TableScan(_) | PlanNode::IndexScan(_) => {
                return Err(CoprError::InvalidPlan(format!(
                    "{} above the leaf position",
                    node.name()
                )));
            }
        };
    }
    Ok(exec)
}

fn column_offsets(columns: &[ColumnInfo]) -> Result<HashMap<i64, usize>> {
    if columns.is_empty() {
        return Err(CoprError::InvalidPlan("scan declares no columns".into()));
    }
    let mut out = HashMap::with_capacity(columns.len());
    for (offset, col) in columns.iter().enumerate() {
        if out.insert(col.column_id, offset).is_some() {
            return Err(CoprError::InvalidPlan(format!(
                "duplicate column id {}",
                col.column_id
            )));
        }
    }
    Ok(out)
}

/// Derive the index key layout from the declared columns: a trailing
/// pk-handle column or a leading synthetic handle column is not part of the
/// key's column segments.
fn index_layout(columns: &[ColumnInfo]) -> Result<(usize, PkStatus)> {
    let Some(last) = columns.last() else {
        return Err(CoprError::InvalidPlan(
            "index scan declares no columns".into(),
        ));
    };
    if last.pk_handle {
        let status = if last.unsigned {
            PkStatus::Unsigned
        } else {
            PkStatus::Signed
        };
        return Ok((columns.len() - 1, status));
    }
    if columns[0].column_id == EXTRA_HANDLE_ID {
        return Ok((columns.len() - 1, PkStatus::Signed));
    }
    Ok((columns.len(), PkStatus::NotExists))
}

fn related_offsets<'e>(
    exprs: impl Iterator<Item = &'e Expr>,
    row_width: usize,
) -> Result<Vec<usize>> {
    let mut offsets = BTreeSet::new();
    for expr in exprs {
        expr.referenced_columns(&mut offsets);
    }
    if let Some(&max) = offsets.iter().next_back() {
        if max >= row_width {
            return Err(CoprError::InvalidPlan(format!(
                "expression references column offset {max}, row width is {row_width}"
            )));
        }
    }
    Ok(offsets.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemStore;

    fn table_scan_node() -> PlanNode {
        PlanNode::TableScan(TableScanDef {
            table_id: 1,
            columns: vec![ColumnInfo::new(1), ColumnInfo::new(2)],
            desc: false,
        })
    }

    fn request(nodes: Vec<PlanNode>) -> PlanRequest {
        PlanRequest {
            nodes,
            ranges: Vec::new(),
            snapshot_ts: 10,
            isolation: IsolationLevel::Si,
            ignore_lock: false,
        }
    }

    #[test]
    fn rejects_malformed_trees() {
        let store = MemStore::new();
        let cancel = CancelToken::new();

        let err = build_pipeline(&request(Vec::new()), &store, cancel.clone()).unwrap_err();
        assert!(matches!(err, CoprError::InvalidPlan(_)));

        let req = request(vec![PlanNode::Limit(LimitDef { limit: 1 })]);
        let err = build_pipeline(&req, &store, cancel.clone()).unwrap_err();
        assert!(matches!(err, CoprError::InvalidPlan(_)));

        let req = request(vec![table_scan_node(), table_scan_node()]);
        let err = build_pipeline(&req, &store, cancel).unwrap_err();
        assert!(matches!(err, CoprError::InvalidPlan(_)));
    }

    #[test]
    fn rejects_duplicate_column_ids() {
        let store = MemStore::new();
        let req = request(vec![PlanNode::TableScan(TableScanDef {
            table_id: 1,
            columns: vec![ColumnInfo::new(1), ColumnInfo::new(1)],
            desc: false,
        })]);
        let err = build_pipeline(&req, &store, CancelToken::new()).unwrap_err();
        assert!(matches!(err, CoprError::InvalidPlan(_)));
    }

    #[test]
    fn rejects_out_of_range_expression_offsets() {
        let store = MemStore::new();
        let req = request(vec![
            table_scan_node(),
            PlanNode::Selection(SelectionDef {
                conditions: vec![Expr::column(7)],
            }),
        ]);
        let err = build_pipeline(&req, &store, CancelToken::new()).unwrap_err();
        assert!(matches!(err, CoprError::InvalidPlan(_)));
    }

    #[test]
    fn index_layout_recognizes_handle_columns() {
        let mut pk = ColumnInfo::new(9);
        pk.pk_handle = true;
        let (cols_len, status) =
            index_layout(&[ColumnInfo::new(1), pk.clone()]).expect("layout");
        assert_eq!((cols_len, status), (1, PkStatus::Signed));

        pk.unsigned = true;
        let (_, status) = index_layout(&[ColumnInfo::new(1), pk]).expect("layout");
        assert_eq!(status, PkStatus::Unsigned);

        let (cols_len, status) =
            index_layout(&[ColumnInfo::new(EXTRA_HANDLE_ID), ColumnInfo::new(1)])
                .expect("layout");
        assert_eq!((cols_len, status), (1, PkStatus::Signed));

        let (cols_len, status) =
            index_layout(&[ColumnInfo::new(1), ColumnInfo::new(2)]).expect("layout");
        assert_eq!((cols_len, status), (2, PkStatus::NotExists));
    }

    #[test]
    fn plan_round_trips_through_serde() {
        let req = PlanRequest {
            nodes: vec![
                table_scan_node(),
                PlanNode::TopN(TopNDef {
                    limit: 3,
                    order_by: vec![OrderBy {
                        expr: Expr::column(0),
                        desc: true,
                    }],
                }),
            ],
            ranges: vec![KeyRange::new(vec![1], vec![2])],
            snapshot_ts: 99,
            isolation: IsolationLevel::Rc,
            ignore_lock: true,
        };
        let encoded = serde_json::to_string(&req).expect("encode");
        let decoded: PlanRequest = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.nodes.len(), 2);
        assert_eq!(decoded.snapshot_ts, 99);
        assert_eq!(decoded.isolation, IsolationLevel::Rc);
    }
}
