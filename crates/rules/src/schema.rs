//! Rule schema types with serde deserialization.
//!
//! Rules are data, not code: conditions and outputs are tagged variants
//! evaluated by a generic interpreter, so rule sets stay serializable and
//! testable. Both JSON and YAML deserialize into these types.

use serde::{Deserialize, Serialize};

use magpie_core::Severity;

// ── Conditions ──────────────────────────────────────────────────────

/// Comparison operators for event field conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Exists,
}

impl ConditionOperator {
    /// Operators that can be translated into store-query predicates for
    /// windowed counting. Aggregation rules are restricted to these.
    pub fn is_store_translatable(self) -> bool {
        matches!(
            self,
            ConditionOperator::Equals
                | ConditionOperator::Exists
                | ConditionOperator::Contains
                | ConditionOperator::Gt
                | ConditionOperator::Gte
                | ConditionOperator::Lt
                | ConditionOperator::Lte
        )
    }
}

/// One predicate against a dotted field path of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    /// Dotted path into the event, e.g. `outcome` or `data.ip`.
    pub field: String,
    pub operator: ConditionOperator,
    /// Comparand; absent for `exists`.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// How a rule's conditions combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionLogic {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

// ── Rule output ─────────────────────────────────────────────────────

/// Whether a rule emits a risk or an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Risk,
    Insight,
}

/// Annotation synthesized when a rule matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleOutput {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    /// Required when `kind` is `risk`; validated at load time.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Annotation text. Aggregation rules may use `{count}`, `{entity}`,
    /// and `{period}` placeholders.
    pub text: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

// ── Event rules ─────────────────────────────────────────────────────

/// A per-event rule: conditions over one event, an annotation on match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EventRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    pub output: RuleOutput,
}

// ── Aggregation rules ───────────────────────────────────────────────

/// Trailing time span over which an aggregation rule counts events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationPeriod {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl std::fmt::Display for AggregationPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationPeriod::Minute => write!(f, "minute"),
            AggregationPeriod::Hour => write!(f, "hour"),
            AggregationPeriod::Day => write!(f, "day"),
            AggregationPeriod::Week => write!(f, "week"),
            AggregationPeriod::Month => write!(f, "month"),
        }
    }
}

/// A sliding-window count-threshold trigger per distinct entity value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AggregationRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Dotted path identifying the grouping key, e.g. `userId` or `data.ip`.
    pub entity_property: String,
    pub period: AggregationPeriod,
    /// Alert when the windowed count reaches this value.
    pub threshold: u64,
    /// Optional filters on which events count toward the threshold.
    /// Restricted to store-translatable operators (validated at load time).
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub output: RuleOutput,
}

pub(crate) fn default_true() -> bool {
    true
}
