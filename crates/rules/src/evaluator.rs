//! Fail-closed condition evaluation and the per-event rule engine.
//!
//! Every malformed input degrades to "no match" rather than raising:
//! missing fields, type mismatches, invalid regexes, and unknown shapes
//! all evaluate to `false`.

use chrono::Utc;
use serde_json::Value;

use magpie_core::{Insight, Risk, RuleOutcome, Severity};

use crate::schema::{Condition, ConditionLogic, ConditionOperator, EventRule, OutputKind};

/// Walk a dot-separated path through a JSON object, short-circuiting to
/// `None` on any missing intermediate.
pub fn lookup_path<'a>(event: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = event;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Evaluate one condition against an event. Never panics; fails closed.
pub fn evaluate_condition(event: &Value, condition: &Condition) -> bool {
    let resolved = lookup_path(event, &condition.field);

    match condition.operator {
        ConditionOperator::Exists => resolved.is_some_and(|v| !v.is_null()),
        ConditionOperator::Equals => match (&condition.value, resolved) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => false,
        },
        ConditionOperator::Contains => text_op(resolved, condition, |v, needle| v.contains(needle)),
        ConditionOperator::StartsWith => {
            text_op(resolved, condition, |v, prefix| v.starts_with(prefix))
        }
        ConditionOperator::EndsWith => {
            text_op(resolved, condition, |v, suffix| v.ends_with(suffix))
        }
        ConditionOperator::Regex => {
            let (Some(value), Some(pattern)) = (
                resolved.and_then(Value::as_str),
                condition.value.as_ref().and_then(Value::as_str),
            ) else {
                return false;
            };
            match regex::Regex::new(pattern) {
                Ok(re) => re.is_match(value),
                Err(err) => {
                    tracing::debug!(field = %condition.field, %err, "invalid regex condition");
                    false
                }
            }
        }
        ConditionOperator::Gt => numeric_op(resolved, condition, |v, c| v > c),
        ConditionOperator::Lt => numeric_op(resolved, condition, |v, c| v < c),
        ConditionOperator::Gte => numeric_op(resolved, condition, |v, c| v >= c),
        ConditionOperator::Lte => numeric_op(resolved, condition, |v, c| v <= c),
        ConditionOperator::In => match (&condition.value, resolved) {
            (Some(Value::Array(members)), Some(actual)) => members.contains(actual),
            _ => false,
        },
    }
}

fn text_op(resolved: Option<&Value>, condition: &Condition, op: impl Fn(&str, &str) -> bool) -> bool {
    match (
        resolved.and_then(Value::as_str),
        condition.value.as_ref().and_then(Value::as_str),
    ) {
        (Some(value), Some(comparand)) => op(value, comparand),
        _ => false,
    }
}

fn numeric_op(resolved: Option<&Value>, condition: &Condition, op: impl Fn(f64, f64) -> bool) -> bool {
    match (
        resolved.and_then(as_f64),
        condition.value.as_ref().and_then(as_f64),
    ) {
        (Some(value), Some(comparand)) => op(value, comparand),
        _ => false,
    }
}

/// Evaluate a rule's conditions against an event per its condition logic.
/// Disabled rules never match.
pub fn rule_matches(event: &Value, rule: &EventRule) -> bool {
    if !rule.enabled {
        return false;
    }
    match rule.condition_logic {
        ConditionLogic::And => rule
            .conditions
            .iter()
            .all(|c| evaluate_condition(event, c)),
        ConditionLogic::Or => rule
            .conditions
            .iter()
            .any(|c| evaluate_condition(event, c)),
    }
}

/// Run all rules against an event and collect risk/insight annotations.
///
/// Single pass: all enabled matching rules fire in rule order, sharing one
/// `triggered_at` timestamp per batch. No rule sees another rule's output.
pub fn apply_event_rules(event: &Value, rules: &[EventRule]) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    let now = Utc::now();

    for rule in rules {
        if !rule_matches(event, rule) {
            continue;
        }
        match rule.output.kind {
            OutputKind::Risk => outcome.risks.push(Risk {
                // Validation guarantees severity on risk outputs; degrade
                // rather than panic if an unvalidated rule slips through.
                severity: rule.output.severity.unwrap_or(Severity::Low),
                text: rule.output.text.clone(),
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                triggered_at: now,
            }),
            OutputKind::Insight => outcome.insights.push(Insight {
                text: rule.output.text.clone(),
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                triggered_at: now,
                metadata: rule.output.metadata.clone(),
            }),
        }
    }

    outcome
}
