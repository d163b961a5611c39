//! Expression trees evaluated against decoded datum rows.
//!
//! Selection and top-N consume expressions through `Expr::eval`; the tree
//! itself arrives inside the operator IR. Comparisons follow three-valued
//! logic: any NULL operand yields NULL, and the row filter collapses NULL
//! to a rejection.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::datum::Datum;
use crate::error::{CoprError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn matches(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Expr {
    /// Offset of a column in the decoded datum row.
    Column(usize),
    Literal(Datum),
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
}

impl Expr {
    pub fn column(offset: usize) -> Expr {
        Expr::Column(offset)
    }

    pub fn literal(datum: Datum) -> Expr {
        Expr::Literal(datum)
    }

    pub fn compare(op: CmpOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn eval(&self, row: &[Datum]) -> Result<Datum> {
        match self {
            Expr::Column(offset) => row.get(*offset).cloned().ok_or_else(|| {
                CoprError::Eval(format!(
                    "column offset {offset} out of range for row of width {}",
                    row.len()
                ))
            }),
            Expr::Literal(datum) => Ok(datum.clone()),
            Expr::Compare { op, lhs, rhs } => {
                let lhs = lhs.eval(row)?;
                let rhs = rhs.eval(row)?;
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Datum::Null);
                }
                Ok(bool_datum(op.matches(lhs.cmp_order(&rhs))))
            }
            Expr::And(children) => {
                let mut saw_null = false;
                for child in children {
                    match child.eval(row)?.to_bool() {
                        Some(false) => return Ok(bool_datum(false)),
                        Some(true) => {}
                        None => saw_null = true,
                    }
                }
                if saw_null {
                    Ok(Datum::Null)
                } else {
                    Ok(bool_datum(true))
                }
            }
            Expr::Or(children) => {
                let mut saw_null = false;
                for child in children {
                    match child.eval(row)?.to_bool() {
                        Some(true) => return Ok(bool_datum(true)),
                        Some(false) => {}
                        None => saw_null = true,
                    }
                }
                if saw_null {
                    Ok(Datum::Null)
                } else {
                    Ok(bool_datum(false))
                }
            }
            Expr::Not(child) => match child.eval(row)?.to_bool() {
                None => Ok(Datum::Null),
                Some(value) => Ok(bool_datum(!value)),
            },
            Expr::IsNull(child) => Ok(bool_datum(child.eval(row)?.is_null())),
        }
    }

    /// Collect every column offset the expression reads.
    pub fn referenced_columns(&self, out: &mut BTreeSet<usize>) {
        match self {
            Expr::Column(offset) => {
                out.insert(*offset);
            }
            Expr::Literal(_) => {}
            Expr::Compare { lhs, rhs, .. } => {
                lhs.referenced_columns(out);
                rhs.referenced_columns(out);
            }
            Expr::And(children) | Expr::Or(children) => {
                for child in children {
                    child.referenced_columns(out);
                }
            }
            Expr::Not(child) | Expr::IsNull(child) => child.referenced_columns(out),
        }
    }
}

/// Ordering key for top-N: expression plus direction. Comparisons are
/// binary; the store has no other collation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderBy {
    pub expr: Expr,
    pub desc: bool,
}

fn bool_datum(value: bool) -> Datum {
    Datum::Int(i64::from(value))
}

/// Decode only the referenced column offsets of a raw byte row into a
/// reusable datum row. Unreferenced offsets are left as they were.
pub fn decode_related_cols(
    related: &[usize],
    raw: &[Vec<u8>],
    out: &mut [Datum],
) -> Result<()> {
    for &offset in related {
        let blob = raw.get(offset).ok_or_else(|| {
            CoprError::Eval(format!(
                "related column offset {offset} out of range for row of width {}",
                raw.len()
            ))
        })?;
        let (datum, _) = Datum::decode(blob)?;
        out[offset] = datum;
    }
    Ok(())
}
