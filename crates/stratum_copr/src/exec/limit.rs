//! Forward at most N source rows.

use crate::error::Result;
use crate::exec::{CancelToken, Executor, Row};

#[derive(Debug)]
pub struct LimitExec<'a> {
    limit: u64,
    cursor: u64,
    src: Box<Executor<'a>>,
    cancel: CancelToken,
}

impl<'a> LimitExec<'a> {
    pub fn new(limit: u64, src: Executor<'a>, cancel: CancelToken) -> Self {
        Self {
            limit,
            cursor: 0,
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
        self.cancel.check()?;
        if self.cursor >= self.limit {
            return Ok(None);
        }
        let Some(row) = self.src.next()? else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(row))
    }
}
