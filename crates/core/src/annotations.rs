//! Risk and insight annotations attached to events by the rules engine.
//!
//! Both are append-only: once a rule fires, the resulting annotation is
//! written onto the event record and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a risk annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A security/compliance concern raised by a matching rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Risk {
    pub severity: Severity,
    pub text: String,
    pub rule_id: String,
    pub rule_name: String,
    pub triggered_at: DateTime<Utc>,
}

/// A neutral observation raised by a matching rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub text: String,
    pub rule_id: String,
    pub rule_name: String,
    pub triggered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Result of running all event rules against a single event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub risks: Vec<Risk>,
    pub insights: Vec<Insight>,
}

impl RuleOutcome {
    pub fn is_empty(&self) -> bool {
        self.risks.is_empty() && self.insights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
        let s: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(s, Severity::Critical);
    }

    #[test]
    fn severity_orders_by_escalation() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn risk_uses_camel_case_keys() {
        let risk = Risk {
            severity: Severity::Medium,
            text: "odd login".to_string(),
            rule_id: "r1".to_string(),
            rule_name: "Odd Login".to_string(),
            triggered_at: Utc::now(),
        };
        let json = serde_json::to_value(&risk).unwrap();
        assert!(json.get("ruleId").is_some());
        assert!(json.get("triggeredAt").is_some());
    }
}
