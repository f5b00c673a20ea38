//! Query predicates and their evaluation.
//!
//! A query is a list of AND-ed [`Condition`]s, an optional descending
//! ordering field and an optional limit. Both store backends evaluate
//! queries with [`apply`] so they agree on every edge case:
//!
//! - a record missing the condition's field never matches;
//! - range comparisons only hold between values of the same kind;
//! - ordering excludes records that lack the ordering field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::record::Record;

/// Comparison operators accepted in a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "in",
            Operator::NotIn => "not-in",
            Operator::ArrayContains => "array-contains",
            Operator::ArrayContainsAny => "array-contains-any",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::NotEq),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "in" => Ok(Operator::In),
            "not-in" => Ok(Operator::NotIn),
            "array-contains" => Ok(Operator::ArrayContains),
            "array-contains-any" => Ok(Operator::ArrayContainsAny),
            _ => Err(format!("Invalid query operator '{}'", s)),
        }
    }
}

/// A single `{field, operator, value}` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Shorthand for an equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    /// Evaluates the condition against a record.
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(&self.field) else {
            return false;
        };

        match self.operator {
            Operator::Eq => values_equal(actual, &self.value),
            Operator::NotEq => !values_equal(actual, &self.value),
            Operator::Lt => compare_same_kind(actual, &self.value) == Some(Ordering::Less),
            Operator::Lte => matches!(
                compare_same_kind(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => compare_same_kind(actual, &self.value) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                compare_same_kind(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::In => self
                .value
                .as_array()
                .is_some_and(|options| options.iter().any(|o| values_equal(actual, o))),
            Operator::NotIn => self
                .value
                .as_array()
                .is_some_and(|options| !options.iter().any(|o| values_equal(actual, o))),
            Operator::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|i| values_equal(i, &self.value))),
            Operator::ArrayContainsAny => match (actual.as_array(), self.value.as_array()) {
                (Some(items), Some(wanted)) => items
                    .iter()
                    .any(|i| wanted.iter().any(|w| values_equal(i, w))),
                _ => false,
            },
        }
    }
}

/// Filters, orders (descending) and limits a set of records.
pub fn apply(
    records: Vec<Record>,
    conditions: &[Condition],
    order_by: Option<&str>,
    limit: Option<usize>,
) -> Vec<Record> {
    let mut matched: Vec<Record> = records
        .into_iter()
        .filter(|r| conditions.iter().all(|c| c.matches(r)))
        .collect();

    if let Some(field) = order_by {
        matched.retain(|r| r.get(field).is_some());
        matched.sort_by(|a, b| match (a.get(field), b.get(field)) {
            (Some(x), Some(y)) => total_cmp(y, x),
            _ => Ordering::Equal,
        });
    }

    if let Some(n) = limit {
        matched.truncate(n);
    }

    matched
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Orders two values of the same kind; `None` for mixed kinds.
fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting: by kind first, then by value.
fn total_cmp(a: &Value, b: &Value) -> Ordering {
    kind_rank(a)
        .cmp(&kind_rank(b))
        .then_with(|| compare_same_kind(a, b).unwrap_or(Ordering::Equal))
}
