//! Comparison operators shared by `transform.filter` and anything else that
//! needs "does this row satisfy the predicate?".

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{as_number, get_row_path, value_to_string};
use crate::types::Row;

/// Normalised comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
    Exists,
}

impl Operator {
    /// Map the many spellings authors use onto one operator.
    pub fn parse(raw: &str) -> Option<Self> {
        let op = match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "=" | "==" | "===" | "eq" | "equals" | "is" => Self::Eq,
            "!=" | "!==" | "<>" | "ne" | "neq" | "not_equals" | "is_not" => Self::Ne,
            ">" | "gt" | "greater_than" => Self::Gt,
            ">=" | "gte" | "ge" => Self::Gte,
            "<" | "lt" | "less_than" => Self::Lt,
            "<=" | "lte" | "le" => Self::Lte,
            "contains" | "includes" => Self::Contains,
            "not_contains" | "excludes" => Self::NotContains,
            "starts_with" | "startswith" => Self::StartsWith,
            "ends_with" | "endswith" => Self::EndsWith,
            "in" | "one_of" => Self::In,
            "not_in" | "none_of" => Self::NotIn,
            "is_empty" | "empty" => Self::IsEmpty,
            "is_not_empty" | "not_empty" => Self::IsNotEmpty,
            "exists" | "is_set" => Self::Exists,
            _ => return None,
        };
        Some(op)
    }

    /// Evaluate `actual OP expected`. A missing `actual` behaves like null.
    pub fn evaluate(self, actual: Option<&Value>, expected: &Value) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self {
            Self::Eq => loose_eq(actual, expected),
            Self::Ne => !loose_eq(actual, expected),
            Self::Gt => compare(actual, expected) == Some(Ordering::Greater),
            Self::Gte => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt => compare(actual, expected) == Some(Ordering::Less),
            Self::Lte => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Contains => contains(actual, expected),
            Self::NotContains => !contains(actual, expected),
            Self::StartsWith => {
                !actual.is_null() && value_to_string(actual).starts_with(&value_to_string(expected))
            }
            Self::EndsWith => {
                !actual.is_null() && value_to_string(actual).ends_with(&value_to_string(expected))
            }
            Self::In => membership(actual, expected),
            Self::NotIn => !membership(actual, expected),
            Self::IsEmpty => is_empty(actual),
            Self::IsNotEmpty => !is_empty(actual),
            Self::Exists => !actual.is_null(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::Exists => "exists",
        };
        write!(f, "{}", s)
    }
}

/// How a list of predicates combines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    #[default]
    And,
    Or,
}

impl CombineMode {
    /// Fold predicate outcomes. An empty list passes under both modes.
    pub fn combine<I: IntoIterator<Item = bool>>(self, outcomes: I) -> bool {
        let mut outcomes = outcomes.into_iter().peekable();
        if outcomes.peek().is_none() {
            return true;
        }
        match self {
            Self::And => outcomes.all(|b| b),
            Self::Or => outcomes.any(|b| b),
        }
    }
}

/// A fully-resolved predicate: the expected value is already known.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: String,
    pub op: Operator,
    pub expected: Value,
}

impl Condition {
    pub fn new(path: impl Into<String>, op: Operator, expected: Value) -> Self {
        Self {
            path: path.into(),
            op,
            expected,
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.op.evaluate(get_row_path(row, &self.path), &self.expected)
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => value_to_string(a) == value_to_string(b),
        },
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(value_to_string(a).cmp(&value_to_string(b))),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::Null => false,
        other => value_to_string(other).contains(&value_to_string(needle)),
    }
}

fn membership(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(items) => items.iter().any(|item| loose_eq(actual, item)),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .any(|part| loose_eq(actual, &Value::String(part.to_string()))),
        other => loose_eq(actual, other),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
