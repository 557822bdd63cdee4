//! Serializable field predicates for `list_by_meta`.
//!
//! A `MetaQuery` maps dotted field paths to predicates. Every predicate
//! must hold for a document to match (AND semantics). Store backends
//! translate these into their native query language; `MemoryStore`
//! evaluates them directly.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetaPredicate {
    /// Exact value equality.
    Eq(Value),
    /// Field is present and non-null.
    Exists,
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Case-insensitive substring match on textual fields.
    ContainsCi(String),
    /// Inclusive range, both bounds required.
    Between { gte: Value, lte: Value },
}

/// Conjunction of field predicates keyed by dotted path.
///
/// `BTreeMap` keeps serialized queries deterministic for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaQuery(pub BTreeMap<String, MetaPredicate>);

impl MetaQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality predicate.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), MetaPredicate::Eq(value.into()));
        self
    }

    /// Add an arbitrary predicate.
    pub fn with(mut self, field: impl Into<String>, predicate: MetaPredicate) -> Self {
        self.0.insert(field.into(), predicate);
        self
    }

    /// Check whether a document body satisfies every predicate.
    pub fn matches(&self, body: &Value) -> bool {
        self.0
            .iter()
            .all(|(path, pred)| pred.matches(lookup(body, path)))
    }
}

/// Walk a dotted path through a JSON object, None on any missing step.
fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = body;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

/// Compare two JSON values when both are numbers or both are strings.
///
/// RFC 3339 timestamps compare correctly as strings, which is what the
/// windowed `occurredAt` range queries rely on.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => None,
    }
}

impl MetaPredicate {
    /// Evaluate against a resolved field value (`None` = absent).
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            MetaPredicate::Exists => value.is_some_and(|v| !v.is_null()),
            MetaPredicate::Eq(expected) => value == Some(expected),
            MetaPredicate::Gt(bound) => {
                value.and_then(|v| compare(v, bound)) == Some(Ordering::Greater)
            }
            MetaPredicate::Gte(bound) => {
                matches!(value.and_then(|v| compare(v, bound)), Some(Ordering::Greater | Ordering::Equal))
            }
            MetaPredicate::Lt(bound) => {
                value.and_then(|v| compare(v, bound)) == Some(Ordering::Less)
            }
            MetaPredicate::Lte(bound) => {
                matches!(value.and_then(|v| compare(v, bound)), Some(Ordering::Less | Ordering::Equal))
            }
            MetaPredicate::ContainsCi(needle) => value
                .and_then(Value::as_str)
                .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase())),
            MetaPredicate::Between { gte, lte } => {
                let Some(v) = value else { return false };
                matches!(compare(v, gte), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare(v, lte), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }
}
