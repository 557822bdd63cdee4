//! Aggregation-rule helpers: time windows, entity extraction, output text.
//!
//! The windowed counting itself lives in the engine crate (it needs the
//! store); everything here is pure.

use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;
use serde_json::Value;

use magpie_core::{Insight, Risk, Severity};

use crate::evaluator::{evaluate_condition, lookup_path};
use crate::schema::{AggregationPeriod, AggregationRule, OutputKind};

impl AggregationPeriod {
    /// The trailing window `[now - period, now]`.
    pub fn window(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = match self {
            AggregationPeriod::Minute => now - Duration::minutes(1),
            AggregationPeriod::Hour => now - Duration::hours(1),
            AggregationPeriod::Day => now - Duration::days(1),
            AggregationPeriod::Week => now - Duration::weeks(1),
            AggregationPeriod::Month => now
                .checked_sub_months(Months::new(1))
                .unwrap_or(now - Duration::days(30)),
        };
        (start, now)
    }
}

/// Whether an enriched event qualifies for a rule's windowed count.
/// All conditions must hold; a rule without conditions matches everything.
/// Disabled rules never match.
pub fn event_matches_rule(event: &Value, rule: &AggregationRule) -> bool {
    if !rule.enabled {
        return false;
    }
    rule.conditions.iter().all(|c| evaluate_condition(event, c))
}

/// Resolve the grouping-key value from an event, as text.
pub fn entity_value(event: &Value, property_path: &str) -> Option<String> {
    match lookup_path(event, property_path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Substitute `{count}`, `{entity}`, and `{period}` placeholders.
pub fn render_output_text(
    text: &str,
    count: u64,
    entity: &str,
    period: AggregationPeriod,
) -> String {
    text.replace("{count}", &count.to_string())
        .replace("{entity}", entity)
        .replace("{period}", &period.to_string())
}

/// The single risk or insight carried by an aggregation alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AggregationOutput {
    Risk(Risk),
    Insight(Insight),
}

/// Build the risk or insight carried by an aggregation alert.
///
/// Insights additionally record count/entity/period in their metadata so
/// downstream consumers don't have to re-parse the text.
pub fn build_output(rule: &AggregationRule, count: u64, entity: &str) -> AggregationOutput {
    let now = Utc::now();
    let text = render_output_text(&rule.output.text, count, entity, rule.period);

    match rule.output.kind {
        OutputKind::Risk => AggregationOutput::Risk(Risk {
            severity: rule.output.severity.unwrap_or(Severity::Low),
            text,
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            triggered_at: now,
        }),
        OutputKind::Insight => {
            let mut metadata = rule
                .output
                .metadata
                .clone()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default();
            metadata.insert("count".to_string(), count.into());
            metadata.insert("entityValue".to_string(), entity.into());
            metadata.insert("period".to_string(), rule.period.to_string().into());
            AggregationOutput::Insight(Insight {
                text,
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                triggered_at: now,
                metadata: Some(Value::Object(metadata)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Condition, ConditionOperator, RuleOutput};
    use serde_json::json;

    fn rule(kind: OutputKind, text: &str) -> AggregationRule {
        AggregationRule {
            id: "brute-force".to_string(),
            name: "Brute Force".to_string(),
            description: None,
            enabled: true,
            entity_property: "userId".to_string(),
            period: AggregationPeriod::Minute,
            threshold: 5,
            conditions: vec![Condition {
                field: "outcome".to_string(),
                operator: ConditionOperator::Equals,
                value: Some(json!("failure")),
            }],
            output: RuleOutput {
                kind,
                severity: Some(Severity::High),
                text: text.to_string(),
                metadata: None,
            },
        }
    }

    #[test]
    fn window_spans_one_period() {
        let now = Utc::now();
        let (start, end) = AggregationPeriod::Hour.window(now);
        assert_eq!(end, now);
        assert_eq!(end - start, Duration::hours(1));

        let (wstart, _) = AggregationPeriod::Week.window(now);
        assert_eq!(now - wstart, Duration::weeks(1));
    }

    #[test]
    fn month_window_handles_calendar_math() {
        let now = "2026-03-31T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let (start, _) = AggregationPeriod::Month.window(now);
        assert!(start < now);
        // chrono clamps to the last valid day of the previous month
        assert_eq!(start.to_rfc3339(), "2026-02-28T12:00:00+00:00");
    }

    #[test]
    fn conditions_gate_event_matching() {
        let r = rule(OutputKind::Risk, "x");
        assert!(event_matches_rule(&json!({"outcome": "failure"}), &r));
        assert!(!event_matches_rule(&json!({"outcome": "success"}), &r));

        let mut open = r.clone();
        open.conditions.clear();
        assert!(event_matches_rule(&json!({"anything": true}), &open));

        let mut off = r;
        off.enabled = false;
        assert!(!event_matches_rule(&json!({"outcome": "failure"}), &off));
    }

    #[test]
    fn entity_value_stringifies_scalars() {
        let event = json!({"userId": "u1", "data": {"port": 443}, "tags": []});
        assert_eq!(entity_value(&event, "userId").as_deref(), Some("u1"));
        assert_eq!(entity_value(&event, "data.port").as_deref(), Some("443"));
        assert_eq!(entity_value(&event, "tags"), None);
        assert_eq!(entity_value(&event, "missing"), None);
    }

    #[test]
    fn placeholders_render() {
        let text = render_output_text(
            "{count} failures for {entity} in one {period}",
            6,
            "u1",
            AggregationPeriod::Minute,
        );
        assert_eq!(text, "6 failures for u1 in one minute");
    }

    #[test]
    fn risk_output_renders_text() {
        let AggregationOutput::Risk(risk) =
            build_output(&rule(OutputKind::Risk, "{count} hits on {entity}"), 6, "u1")
        else {
            panic!("expected risk output");
        };
        assert_eq!(risk.text, "6 hits on u1");
        assert_eq!(risk.severity, Severity::High);
    }

    #[test]
    fn insight_output_carries_window_metadata() {
        let AggregationOutput::Insight(insight) =
            build_output(&rule(OutputKind::Insight, "busy {entity}"), 9, "10.0.0.1")
        else {
            panic!("expected insight output");
        };
        let meta = insight.metadata.as_ref().unwrap();
        assert_eq!(meta["count"], 9);
        assert_eq!(meta["entityValue"], "10.0.0.1");
        assert_eq!(meta["period"], "minute");
    }
}
