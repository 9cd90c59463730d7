//! Row predicates
//!
//! A deliberately small predicate language: comparisons of a single field
//! against a JSON value, combined with `and` / `or`. Sharded engines ask a
//! query for the [`KeyRange`] it allows on the sharding key so that
//! partitions outside that range are never opened.

use std::cmp::Ordering;

use serde_json::Value;

use crate::table_config::ShardKey;

/// A field of a row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    /// The row id, in the table's id representation
    Id,
    /// A JSON pointer into the row document
    Pointer(String),
}

impl FieldPath {
    pub fn pointer(path: impl Into<String>) -> Self {
        FieldPath::Pointer(path.into())
    }
}

impl From<&ShardKey> for FieldPath {
    fn from(key: &ShardKey) -> Self {
        match key {
            ShardKey::Id => FieldPath::Id,
            ShardKey::Field(pointer) => FieldPath::Pointer(pointer.clone()),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Anything a query can read fields from
pub trait FieldSource {
    fn field(&self, path: &FieldPath) -> Option<Value>;
}

/// A predicate over rows
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Matches every row
    All,
    Compare {
        field: FieldPath,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
}

impl Query {
    pub fn compare(field: FieldPath, op: CompareOp, value: impl Into<Value>) -> Self {
        Query::Compare {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: FieldPath, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: FieldPath, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn gt(field: FieldPath, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: FieldPath, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn lt(field: FieldPath, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: FieldPath, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn and(self, other: Query) -> Self {
        match self {
            Query::And(mut parts) => {
                parts.push(other);
                Query::And(parts)
            }
            first => Query::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Query) -> Self {
        match self {
            Query::Or(mut parts) => {
                parts.push(other);
                Query::Or(parts)
            }
            first => Query::Or(vec![first, other]),
        }
    }

    /// Evaluate the predicate against a row
    pub fn matches<S: FieldSource + ?Sized>(&self, source: &S) -> bool {
        match self {
            Query::All => true,
            Query::Compare { field, op, value } => {
                let Some(actual) = source.field(field) else {
                    return false;
                };
                let ordering = compare_values(&actual, value);
                match op {
                    CompareOp::Eq => ordering == Some(Ordering::Equal),
                    CompareOp::Ne => ordering != Some(Ordering::Equal),
                    CompareOp::Gt => ordering == Some(Ordering::Greater),
                    CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                    CompareOp::Lt => ordering == Some(Ordering::Less),
                    CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                }
            }
            Query::And(parts) => parts.iter().all(|q| q.matches(source)),
            Query::Or(parts) => parts.iter().any(|q| q.matches(source)),
        }
    }

    /// The range of integer keys on `key` that can possibly match
    ///
    /// Conservative: anything the range cannot express (non-numeric values,
    /// `ne`, other fields) widens to the full range.
    pub fn key_range(&self, key: &FieldPath) -> KeyRange {
        match self {
            Query::All => KeyRange::full(),
            Query::Compare { field, op, value } if field == key => {
                KeyRange::from_comparison(*op, value)
            }
            Query::Compare { .. } => KeyRange::full(),
            Query::And(parts) => parts
                .iter()
                .fold(KeyRange::full(), |acc, q| acc.intersect(&q.key_range(key))),
            Query::Or(parts) => parts
                .iter()
                .fold(KeyRange::empty(), |acc, q| acc.hull(&q.key_range(key))),
        }
    }
}

/// Order two JSON values of the same kind; `None` if they are not comparable
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// An inclusive range of integer keys; empty when `lo > hi`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub lo: i64,
    pub hi: i64,
}

impl KeyRange {
    pub fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    pub fn full() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    pub fn empty() -> Self {
        Self::new(i64::MAX, i64::MIN)
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    pub fn is_full(&self) -> bool {
        self.lo == i64::MIN && self.hi == i64::MAX
    }

    pub fn contains(&self, key: i64) -> bool {
        self.lo <= key && key <= self.hi
    }

    pub fn intersect(&self, other: &KeyRange) -> KeyRange {
        KeyRange::new(self.lo.max(other.lo), self.hi.min(other.hi))
    }

    /// Smallest range covering both
    pub fn hull(&self, other: &KeyRange) -> KeyRange {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        KeyRange::new(self.lo.min(other.lo), self.hi.max(other.hi))
    }

    /// Whether this range shares a key with the half-open interval `[lower, upper)`
    pub fn overlaps(&self, lower: i64, upper: i64) -> bool {
        !self.is_empty() && lower < upper && self.lo < upper && lower <= self.hi
    }

    fn from_comparison(op: CompareOp, value: &Value) -> KeyRange {
        let Value::Number(number) = value else {
            return KeyRange::full();
        };

        if let Some(k) = number.as_i64() {
            return match op {
                CompareOp::Eq => KeyRange::new(k, k),
                CompareOp::Ne => KeyRange::full(),
                CompareOp::Gt => match k.checked_add(1) {
                    Some(lo) => KeyRange::new(lo, i64::MAX),
                    None => KeyRange::empty(),
                },
                CompareOp::Ge => KeyRange::new(k, i64::MAX),
                CompareOp::Lt => match k.checked_sub(1) {
                    Some(hi) => KeyRange::new(i64::MIN, hi),
                    None => KeyRange::empty(),
                },
                CompareOp::Le => KeyRange::new(i64::MIN, k),
            };
        }

        // Fractional bounds: keys are integers, so round towards the range
        match (op, number.as_f64()) {
            (CompareOp::Gt | CompareOp::Ge, Some(f)) if f.is_finite() => {
                let lo = if op == CompareOp::Gt && f.fract() == 0.0 {
                    f + 1.0
                } else {
                    f.ceil()
                };
                KeyRange::new(saturate(lo), i64::MAX)
            }
            (CompareOp::Lt | CompareOp::Le, Some(f)) if f.is_finite() => {
                let hi = if op == CompareOp::Lt && f.fract() == 0.0 {
                    f - 1.0
                } else {
                    f.floor()
                };
                KeyRange::new(i64::MIN, saturate(hi))
            }
            _ => KeyRange::full(),
        }
    }
}

fn saturate(f: f64) -> i64 {
    if f >= i64::MAX as f64 {
        i64::MAX
    } else if f <= i64::MIN as f64 {
        i64::MIN
    } else {
        f as i64
    }
}
