//! Rule set validation, run once at load/construction time.
//!
//! Malformed rules fail fast here so the evaluation path never has to
//! guess: a risk output without severity, a duplicate id, an aggregation
//! condition the store cannot translate, or a zero threshold all reject
//! the whole set.

use std::collections::HashSet;

use crate::loader::RuleError;
use crate::schema::{AggregationRule, EventRule, OutputKind};

/// Validate a complete rule set. Returns the first blocking problem.
pub fn validate_rule_set(
    event_rules: &[EventRule],
    aggregation_rules: &[AggregationRule],
) -> Result<(), RuleError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for rule in event_rules {
        if !seen_ids.insert(rule.id.as_str()) {
            return Err(RuleError::Validation(format!("duplicate rule id '{}'", rule.id)));
        }
        validate_output(&rule.id, rule.output.kind, rule.output.severity.is_some())?;
        if rule.conditions.is_empty() {
            return Err(RuleError::Validation(format!(
                "event rule '{}' has no conditions",
                rule.id
            )));
        }
    }

    for rule in aggregation_rules {
        if !seen_ids.insert(rule.id.as_str()) {
            return Err(RuleError::Validation(format!("duplicate rule id '{}'", rule.id)));
        }
        validate_output(&rule.id, rule.output.kind, rule.output.severity.is_some())?;
        if rule.entity_property.is_empty() {
            return Err(RuleError::Validation(format!(
                "aggregation rule '{}' has an empty entityProperty",
                rule.id
            )));
        }
        if rule.threshold == 0 {
            return Err(RuleError::Validation(format!(
                "aggregation rule '{}' has a zero threshold",
                rule.id
            )));
        }
        for condition in &rule.conditions {
            if !condition.operator.is_store_translatable() {
                return Err(RuleError::Validation(format!(
                    "aggregation rule '{}' uses operator {:?} on '{}', which cannot be \
                     translated into a store query",
                    rule.id, condition.operator, condition.field
                )));
            }
        }
    }

    Ok(())
}

fn validate_output(rule_id: &str, kind: OutputKind, has_severity: bool) -> Result<(), RuleError> {
    if kind == OutputKind::Risk && !has_severity {
        return Err(RuleError::Validation(format!(
            "rule '{}' emits a risk but has no severity",
            rule_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        AggregationPeriod, Condition, ConditionLogic, ConditionOperator, RuleOutput,
    };
    use magpie_core::Severity;
    use serde_json::json;

    fn event_rule(id: &str) -> EventRule {
        EventRule {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            enabled: true,
            conditions: vec![Condition {
                field: "action".to_string(),
                operator: ConditionOperator::Exists,
                value: None,
            }],
            condition_logic: ConditionLogic::And,
            output: RuleOutput {
                kind: OutputKind::Risk,
                severity: Some(Severity::Low),
                text: "x".to_string(),
                metadata: None,
            },
        }
    }

    fn agg_rule(id: &str) -> AggregationRule {
        AggregationRule {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            enabled: true,
            entity_property: "userId".to_string(),
            period: AggregationPeriod::Hour,
            threshold: 5,
            conditions: vec![],
            output: RuleOutput {
                kind: OutputKind::Insight,
                severity: None,
                text: "x".to_string(),
                metadata: None,
            },
        }
    }

    #[test]
    fn valid_set_passes() {
        assert!(validate_rule_set(&[event_rule("e1")], &[agg_rule("a1")]).is_ok());
    }

    #[test]
    fn risk_without_severity_rejected() {
        let mut rule = event_rule("e1");
        rule.output.severity = None;
        let err = validate_rule_set(&[rule], &[]).unwrap_err();
        assert!(err.to_string().contains("severity"));
    }

    #[test]
    fn duplicate_ids_rejected_across_kinds() {
        let err = validate_rule_set(&[event_rule("same")], &[agg_rule("same")]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn untranslatable_agg_operator_rejected() {
        let mut rule = agg_rule("a1");
        rule.conditions.push(Condition {
            field: "resource".to_string(),
            operator: ConditionOperator::Regex,
            value: Some(json!("^/admin")),
        });
        let err = validate_rule_set(&[], &[rule]).unwrap_err();
        assert!(err.to_string().contains("cannot be translated"));
    }

    #[test]
    fn zero_threshold_rejected() {
        let mut rule = agg_rule("a1");
        rule.threshold = 0;
        assert!(validate_rule_set(&[], &[rule]).is_err());
    }
}
