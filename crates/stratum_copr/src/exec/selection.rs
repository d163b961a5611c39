//! Row filter over a conjunction of predicates.

use crate::datum::Datum;
use crate::error::Result;
use crate::exec::{CancelToken, Executor, Row};
use crate::expr::{self, Expr};

#[derive(Debug)]
pub struct SelectionExec<'a> {
    conditions: Vec<Expr>,
    related_offsets: Vec<usize>,
    datum_row: Vec<Datum>,
    src: Box<Executor<'a>>,
    cancel: CancelToken,
}

impl<'a> SelectionExec<'a> {
    pub fn new(
        conditions: Vec<Expr>,
        related_offsets: Vec<usize>,
        row_width: usize,
        src: Executor<'a>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            conditions,
            related_offsets,
            datum_row: vec![Datum::Null; row_width],
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

    /// Pull source rows until one satisfies every predicate, passing the
    /// matching byte row through unchanged.
    pub fn next(&mut self) -> Result<Option<Row>> {
        loop {
            self.cancel.check()?;
            let Some(row) = self.src.next()? else {
                return Ok(None);
            };
            expr::decode_related_cols(&self.related_offsets, &row, &mut self.datum_row)?;
            if self.matches()? {
                return Ok(Some(row));
            }
        }
    }

    fn matches(&self) -> Result<bool> {
        for cond in &self.conditions {
            let value = cond.eval(&self.datum_row)?;
            // NULL collapses to false at the row filter.
            match value.to_bool() {
                None | Some(false) => return Ok(false),
                Some(true) => {}
            }
        }
        Ok(true)
    }
}
