//! Shared fixtures for pipeline tests.

#![allow(dead_code)]

use stratum_copr::{
    build_pipeline, keys, row, CancelToken, ColumnInfo, CoprError, Datum, Executor,
    IsolationLevel, KeyRange, MemStore, PlanNode, PlanRequest, Row, TableScanDef,
};

pub const TABLE_ID: u64 = 1;
pub const INDEX_ID: u64 = 2;
pub const WRITE_TS: u64 = 5;
pub const READ_TS: u64 = 10;

/// Store one table row whose payload carries the given columns.
pub fn put_table_row(store: &MemStore, handle: i64, cols: &[(i64, Datum)]) {
    store.put(
        &keys::encode_record_key(TABLE_ID, handle),
        &row::encode_row(cols),
        WRITE_TS,
    );
}

/// Store one non-unique index entry: column datums plus the handle in the
/// key tail.
pub fn put_index_entry(store: &MemStore, datums: &[Datum], handle: i64) {
    let cols: Vec<Vec<u8>> = datums.iter().map(|d| d.encode()).collect();
    let handle_datum = Datum::Int(handle).encode();
    let key = keys::encode_index_key(TABLE_ID, INDEX_ID, &cols, Some(&handle_datum));
    store.put(&key, b"\x00", WRITE_TS);
}

/// Store one unique index entry: the handle rides in the value.
pub fn put_unique_index_entry(store: &MemStore, datums: &[Datum], handle: i64) {
    let cols: Vec<Vec<u8>> = datums.iter().map(|d| d.encode()).collect();
    let key = keys::encode_index_key(TABLE_ID, INDEX_ID, &cols, None);
    store.put(&key, &keys::encode_handle_value(handle), WRITE_TS);
}

/// The range covering every possible handle of the fixture table.
pub fn full_table_range() -> KeyRange {
    KeyRange::new(
        keys::encode_record_key(TABLE_ID, i64::MIN),
        keys::prefix_next(&keys::encode_record_key(TABLE_ID, i64::MAX)),
    )
}

/// `[lo, hi)` over fixture table handles.
pub fn handle_range(lo: i64, hi: i64) -> KeyRange {
    KeyRange::new(
        keys::encode_record_key(TABLE_ID, lo),
        keys::encode_record_key(TABLE_ID, hi),
    )
}

pub fn table_scan_request(columns: Vec<ColumnInfo>, ranges: Vec<KeyRange>, desc: bool) -> PlanRequest {
    PlanRequest {
        nodes: vec![PlanNode::TableScan(TableScanDef {
            table_id: TABLE_ID,
            columns,
            desc,
        })],
        ranges,
        snapshot_ts: READ_TS,
        isolation: IsolationLevel::Si,
        ignore_lock: false,
    }
}

pub fn collect(exec: &mut Executor<'_>) -> Result<Vec<Row>, CoprError> {
    let mut rows = Vec::new();
    while let Some(row) = exec.next()? {
        rows.push(row);
    }
    Ok(rows)
}

/// First-column datum of every collected row, decoded as i64.
pub fn first_col_ints(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .map(|row| match Datum::decode(&row[0]).expect("decode").0 {
            Datum::Int(v) => v,
            other => panic!("expected int datum, got {other:?}"),
        })
        .collect()
}

pub fn pk_column(column_id: i64) -> ColumnInfo {
    let mut col = ColumnInfo::new(column_id);
    col.pk_handle = true;
    col
}

pub fn build_on<'a>(
    req: &PlanRequest,
    store: &'a MemStore,
    cancel: CancelToken,
) -> Executor<'a> {
    build_pipeline(req, store, cancel).expect("build pipeline")
}
