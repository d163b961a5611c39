//! Bounded partial sort.
//!
//! A `BinaryHeap` capped at K rows keeps the K best rows seen so far. Each
//! entry orders itself by the request's ordering key, so the heap's natural
//! max is the worst kept candidate and a better row replaces it through
//! `peek_mut`. Rows stream out only after the source is fully drained, so
//! this operator cannot produce a resume cursor.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::datum::Datum;
use crate::error::Result;
use crate::exec::{CancelToken, Executor, Row};
use crate::expr::{self, OrderBy};

#[derive(Debug)]
struct SortRow {
    key: Vec<Datum>,
    data: Row,
    order_by: Arc<[OrderBy]>,
}

impl PartialEq for SortRow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortRow {}

impl PartialOrd for SortRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortRow {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_keys(&self.order_by, &self.key, &other.key)
    }
}

#[derive(Debug)]
pub struct TopNExec<'a> {
    limit: usize,
    order_by: Arc<[OrderBy]>,
    related_offsets: Vec<usize>,
    datum_row: Vec<Datum>,
    /// Max by output order while collecting, so the root is the worst kept
    /// row.
    heap: BinaryHeap<SortRow>,
    /// Heap contents in emit order once the source is drained.
    sorted: Vec<SortRow>,
    cursor: usize,
    executed: bool,
    src: Box<Executor<'a>>,
    cancel: CancelToken,
}

impl<'a> TopNExec<'a> {
    pub fn new(
        limit: usize,
        order_by: Vec<OrderBy>,
        related_offsets: Vec<usize>,
        row_width: usize,
        src: Executor<'a>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            limit,
            order_by: order_by.into(),
            related_offsets,
            datum_row: vec![Datum::Null; row_width],
            heap: BinaryHeap::new(),
            sorted: Vec::new(),
            cursor: 0,
            executed: false,
            src: Box::new(src),
            cancel,
        }
    }

    pub fn set_src(&mut self, src: Executor<'a>) {
        self.src = Box::new(src);
    }

    pub fn src(&self) -> &Executor<'a> {
        &self.src
    }

    pub fn src_mut(&mut self) -> &mut Executor<'a> {
        &mut self.src
    }

    pub fn next(&mut self) -> Result<Option<Row>> {
        if !self.executed {
            loop {
                self.cancel.check()?;
                let Some(row) = self.src.next()? else {
                    break;
                };
                self.collect(row)?;
            }
            self.sorted = std::mem::take(&mut self.heap).into_sorted_vec();
            self.executed = true;
        }
        if self.cursor >= self.sorted.len() {
            return Ok(None);
        }
        let row = std::mem::take(&mut self.sorted[self.cursor].data);
        self.cursor += 1;
        Ok(Some(row))
    }

    /// Evaluate the ordering key for one source row and offer it to the
    /// heap.
    fn collect(&mut self, row: Row) -> Result<()> {
        expr::decode_related_cols(&self.related_offsets, &row, &mut self.datum_row)?;
        let mut key = Vec::with_capacity(self.order_by.len());
        for item in self.order_by.iter() {
            key.push(item.expr.eval(&self.datum_row)?);
        }
        try_add(
            &mut self.heap,
            self.limit,
            SortRow {
                key,
                data: row,
                order_by: Arc::clone(&self.order_by),
            },
        );
        Ok(())
    }
}

fn try_add(heap: &mut BinaryHeap<SortRow>, limit: usize, row: SortRow) {
    if limit == 0 {
        return;
    }
    if heap.len() < limit {
        heap.push(row);
        return;
    }
    if let Some(mut root) = heap.peek_mut() {
        // Replace the worst kept row only when the new key is strictly
        // better; the heap restores itself when the guard drops.
        if row.cmp(&*root) == Ordering::Less {
            *root = row;
        }
    }
}

/// Lexicographic comparison of ordering keys in output order: position by
/// position, datum order reversed where the position is descending.
fn cmp_keys(order_by: &[OrderBy], a: &[Datum], b: &[Datum]) -> Ordering {
    for (idx, item) in order_by.iter().enumerate() {
        let ord = a[idx].cmp_order(&b[idx]);
        let ord = if item.desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
