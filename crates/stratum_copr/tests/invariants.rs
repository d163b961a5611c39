//! Randomized invariant checks over the in-memory MVCC engine.
//!
//! Seeded generators keep every run reproducible.

mod common;

use std::cell::RefCell;
use std::collections::BTreeSet;

use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stratum_copr::reader::ScanFn;
use stratum_copr::{
    build_pipeline, keys, CancelToken, CmpOp, ColumnInfo, Datum, Expr, KeyRange, LimitDef,
    MemStore, OrderBy, PlanNode, Result, SnapshotReader, TopNDef,
};

fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Random set of handles plus random non-overlapping ranges over them.
/// Singleton ranges come out as point ranges, so both scan paths get
/// exercised.
fn random_layout(rng: &mut StdRng) -> (Vec<i64>, Vec<KeyRange>, Vec<(i64, i64)>) {
    let mut handles = BTreeSet::new();
    for _ in 0..rng.gen_range(5..40) {
        handles.insert(rng.gen_range(-60i64..60));
    }
    let handles: Vec<i64> = handles.into_iter().collect();

    let mut bounds = BTreeSet::new();
    for _ in 0..rng.gen_range(2..8) {
        bounds.insert(rng.gen_range(-70i64..70));
    }
    let bounds: Vec<i64> = bounds.into_iter().collect();

    let mut ranges = Vec::new();
    let mut spans = Vec::new();
    for pair in bounds.chunks(2) {
        if let [lo, hi] = pair {
            ranges.push(handle_range(*lo, *hi));
            spans.push((*lo, *hi));
        }
    }
    (handles, ranges, spans)
}

fn covered(handles: &[i64], spans: &[(i64, i64)]) -> Vec<i64> {
    handles
        .iter()
        .copied()
        .filter(|h| spans.iter().any(|(lo, hi)| h >= lo && h < hi))
        .collect()
}

#[test]
fn scans_cover_ranges_exactly_once_in_order() {
    let mut rng = seeded(0xC0FFEE);
    for trial in 0..50 {
        let (handles, ranges, spans) = random_layout(&mut rng);
        if ranges.is_empty() {
            continue;
        }
        let store = MemStore::new();
        for &handle in &handles {
            put_table_row(&store, handle, &[(1, Datum::Int(handle))]);
        }

        let expected = covered(&handles, &spans);

        let req = table_scan_request(vec![pk_column(1)], ranges.clone(), false);
        let mut exec = build_on(&req, &store, CancelToken::new());
        let rows = collect(&mut exec).expect("collect");
        assert_eq!(first_col_ints(&rows), expected, "trial {trial} ascending");

        // Descending requests carry the range list in visit order, highest
        // range first.
        let mut desc_ranges = ranges.clone();
        desc_ranges.reverse();
        let req = table_scan_request(vec![pk_column(1)], desc_ranges, true);
        let mut exec = build_on(&req, &store, CancelToken::new());
        let rows = collect(&mut exec).expect("collect");
        let mut reversed = expected.clone();
        reversed.reverse();
        assert_eq!(first_col_ints(&rows), reversed, "trial {trial} descending");
    }
}

#[test]
fn limit_equals_take() {
    let mut rng = seeded(0xBEEF);
    for _ in 0..30 {
        let (handles, ranges, spans) = random_layout(&mut rng);
        if ranges.is_empty() {
            continue;
        }
        let store = MemStore::new();
        for &handle in &handles {
            put_table_row(&store, handle, &[(1, Datum::Int(handle))]);
        }
        let expected = covered(&handles, &spans);
        let limit = rng.gen_range(0..10u64);

        let mut req = table_scan_request(vec![pk_column(1)], ranges, false);
        req.nodes.push(PlanNode::Limit(LimitDef { limit }));
        let mut exec = build_on(&req, &store, CancelToken::new());
        let rows = collect(&mut exec).expect("collect");
        let want: Vec<i64> = expected.into_iter().take(limit as usize).collect();
        assert_eq!(first_col_ints(&rows), want);
    }
}

#[test]
fn selection_emits_exactly_the_satisfying_rows() {
    let mut rng = seeded(0xDEAD);
    for _ in 0..30 {
        let (handles, ranges, spans) = random_layout(&mut rng);
        if ranges.is_empty() {
            continue;
        }
        let store = MemStore::new();
        for &handle in &handles {
            put_table_row(&store, handle, &[(1, Datum::Int(handle))]);
        }
        let threshold = rng.gen_range(-60i64..60);

        let mut req = table_scan_request(vec![pk_column(1)], ranges, false);
        req.nodes.push(PlanNode::Selection(stratum_copr::SelectionDef {
            conditions: vec![Expr::compare(
                CmpOp::Ge,
                Expr::column(0),
                Expr::literal(Datum::Int(threshold)),
            )],
        }));
        let mut exec = build_on(&req, &store, CancelToken::new());
        let rows = collect(&mut exec).expect("collect");

        let want: Vec<i64> = covered(&handles, &spans)
            .into_iter()
            .filter(|h| *h >= threshold)
            .collect();
        assert_eq!(first_col_ints(&rows), want);
    }
}

#[test]
fn top_n_matches_sort_then_take() {
    let mut rng = seeded(0xF00D);
    for _ in 0..40 {
        let store = MemStore::new();
        let row_count = rng.gen_range(1..30);
        let mut stored: Vec<(i64, i64)> = Vec::new();
        for handle in 0..row_count {
            // A narrow key domain forces ties.
            let k1 = rng.gen_range(0i64..6);
            let k2 = rng.gen_range(0i64..4);
            stored.push((k1, k2));
            put_table_row(
                &store,
                handle,
                &[(1, Datum::Int(k1)), (2, Datum::Int(k2))],
            );
        }
        let limit = rng.gen_range(0..12u64);

        let mut req = table_scan_request(
            vec![ColumnInfo::new(1), ColumnInfo::new(2)],
            vec![full_table_range()],
            false,
        );
        req.nodes.push(PlanNode::TopN(TopNDef {
            limit,
            order_by: vec![
                OrderBy {
                    expr: Expr::column(0),
                    desc: false,
                },
                OrderBy {
                    expr: Expr::column(1),
                    desc: true,
                },
            ],
        }));
        let mut exec = build_on(&req, &store, CancelToken::new());
        let rows = collect(&mut exec).expect("collect");

        let mut want = stored.clone();
        want.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        want.truncate(limit as usize);

        let got: Vec<(i64, i64)> = rows
            .iter()
            .map(|row| {
                let k1 = match Datum::decode(&row[0]).expect("k1").0 {
                    Datum::Int(v) => v,
                    other => panic!("unexpected {other:?}"),
                };
                let k2 = match Datum::decode(&row[1]).expect("k2").0 {
                    Datum::Int(v) => v,
                    other => panic!("unexpected {other:?}"),
                };
                (k1, k2)
            })
            .collect();
        assert_eq!(got, want);
    }
}

#[test]
fn counts_sum_to_rows_emitted() {
    let mut rng = seeded(0xACE);
    for _ in 0..30 {
        let (handles, ranges, _) = random_layout(&mut rng);
        if ranges.is_empty() {
            continue;
        }
        let store = MemStore::new();
        for &handle in &handles {
            put_table_row(&store, handle, &[(1, Datum::Int(handle))]);
        }

        let req = table_scan_request(vec![pk_column(1)], ranges, false);
        let mut exec = build_on(&req, &store, CancelToken::new());
        let mut emitted = 0i64;
        while exec.next().expect("next").is_some() {
            emitted += 1;
            assert_eq!(exec.counts().iter().sum::<i64>(), emitted);
        }
        assert_eq!(exec.counts().iter().sum::<i64>(), emitted);
        exec.reset_counts();
        assert_eq!(exec.counts().iter().sum::<i64>(), 0);
    }
}

#[test]
fn forward_cursors_never_move_backward() {
    let mut rng = seeded(0xCAFE);
    for _ in 0..20 {
        let (handles, ranges, _) = random_layout(&mut rng);
        if ranges.is_empty() {
            continue;
        }
        let store = MemStore::new();
        for &handle in &handles {
            put_table_row(&store, handle, &[(1, Datum::Int(handle))]);
        }

        let req = table_scan_request(vec![pk_column(1)], ranges, false);
        let mut exec = build_on(&req, &store, CancelToken::new());
        let mut last_cursor: Option<Vec<u8>> = None;
        while exec.next().expect("next").is_some() {
            let (cursor, desc) = exec.cursor().expect("cursor");
            assert!(!desc);
            if let Some(prev) = &last_cursor {
                assert!(cursor >= *prev, "cursor moved backward");
            }
            last_cursor = Some(cursor);
        }
    }
}

#[test]
fn prefix_prev_round_trip_holds_for_random_keys() {
    let mut rng = seeded(0x51ED);
    for _ in 0..200 {
        let len = rng.gen_range(1..12usize);
        let key: Vec<u8> = (0..len).map(|_| rng.gen::<u8>()).collect();
        match keys::prefix_prev(&key) {
            None => assert!(key.iter().all(|b| *b == 0)),
            Some(prev) => {
                assert!(prev < key);
                assert!(keys::prefix_next(&prev) <= key);
            }
        }
    }
}

/// Reader wrapper that hands callbacks slices into buffers it reuses for
/// every entry. Output rows must survive the reuse, which proves the decode
/// path copies at the callback boundary.
struct ReusingReader {
    inner: MemStore,
    key_buf: RefCell<Vec<u8>>,
    val_buf: RefCell<Vec<u8>>,
}

impl ReusingReader {
    fn new(inner: MemStore) -> Self {
        Self {
            inner,
            key_buf: RefCell::new(Vec::new()),
            val_buf: RefCell::new(Vec::new()),
        }
    }
}

impl SnapshotReader for ReusingReader {
    fn get(&self, key: &[u8], ts: u64) -> Result<Option<Vec<u8>>> {
        self.inner.get(key, ts)
    }

    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        ts: u64,
        f: &mut ScanFn<'_>,
    ) -> Result<()> {
        self.inner.scan(start, end, limit, ts, &mut |key, value| {
            let mut key_buf = self.key_buf.borrow_mut();
            let mut val_buf = self.val_buf.borrow_mut();
            key_buf.clear();
            key_buf.extend_from_slice(key);
            val_buf.clear();
            val_buf.extend_from_slice(value);
            f(key_buf.as_slice(), val_buf.as_slice())
        })
    }

    fn reverse_scan(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        ts: u64,
        f: &mut ScanFn<'_>,
    ) -> Result<()> {
        self.inner
            .reverse_scan(start, end, limit, ts, &mut |key, value| {
                let mut key_buf = self.key_buf.borrow_mut();
                let mut val_buf = self.val_buf.borrow_mut();
                key_buf.clear();
                key_buf.extend_from_slice(key);
                val_buf.clear();
                val_buf.extend_from_slice(value);
                f(key_buf.as_slice(), val_buf.as_slice())
            })
    }

    fn check_range_lock(&self, ts: u64, start: &[u8], end: &[u8]) -> Result<()> {
        self.inner.check_range_lock(ts, start, end)
    }
}

#[test]
fn rows_survive_storage_buffer_reuse() {
    let store = MemStore::new();
    for handle in 1..=20 {
        put_table_row(&store, handle, &[(1, Datum::Int(handle)), (2, Datum::Int(handle * 7))]);
    }
    let reader = ReusingReader::new(store);

    let req = table_scan_request(
        vec![pk_column(1), ColumnInfo::new(2)],
        vec![full_table_range()],
        false,
    );
    let mut exec = build_pipeline(&req, &reader, CancelToken::new()).expect("build");
    let rows = collect(&mut exec).expect("collect");
    assert_eq!(rows.len(), 20);
    for (idx, row) in rows.iter().enumerate() {
        let handle = idx as i64 + 1;
        assert_eq!(row[0], Datum::Int(handle).encode());
        assert_eq!(row[1], Datum::Int(handle * 7).encode());
    }
}
