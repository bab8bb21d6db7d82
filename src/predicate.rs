//! A single-column comparison applied during `update`/`delete` scans.
//!
//! Grounded on the teacher's `Predicate { field_index, op, cell }` and
//! its `matches()` method, retargeted at the new `Value` type and
//! restricted to the five comparison operators the design names
//! (equality and ordering; no `LIKE`).

use std::fmt;

use crate::operator::Op;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Predicate {
    pub column_index: usize,
    pub op: Op,
    pub value: Value,
}

impl Predicate {
    pub fn new(column_index: usize, op: Op, value: Value) -> Self {
        Self { column_index, op, value }
    }

    /// Evaluates the predicate against one row's already-decoded
    /// values. Numeric comparisons fall back to `f64`; string
    /// comparisons use lexicographic ordering.
    pub fn matches(&self, row: &[Value]) -> bool {
        let candidate = &row[self.column_index];
        match (candidate, &self.value) {
            (Value::Str(a), Value::Str(b)) => match self.op {
                Op::Equals => a == b,
                Op::GreaterThan => a > b,
                Op::GreaterThanOrEq => a >= b,
                Op::LessThan => a < b,
                Op::LessThanOrEq => a <= b,
            },
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => match self.op {
                    Op::Equals => a == b,
                    Op::GreaterThan => a > b,
                    Op::GreaterThanOrEq => a >= b,
                    Op::LessThan => a < b,
                    Op::LessThanOrEq => a <= b,
                },
                _ => false,
            },
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "column[{}] {:?} {:?}", self.column_index, self.op, self.value)
    }
}
