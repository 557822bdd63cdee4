//! Time-windowed threshold detection over historical events.
//!
//! For each qualifying rule, the engine re-queries the audit collection
//! for events sharing the rule's entity value within the trailing window,
//! counts them, and persists an alert record when the count reaches the
//! threshold. There is no dedup or cooldown: a rule satisfied on N
//! consecutive qualifying events fires N times.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use magpie_core::Config;
use magpie_rules::{
    build_output, entity_value, event_matches_rule, AggregationRule, Condition,
    ConditionOperator, RuleSet,
};
use magpie_store::{DocumentStore, MetaPredicate, MetaQuery};

use crate::error::EngineError;
use crate::record::{report_error, ErrorHook};

pub(crate) struct AggregationRuleEngine {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    rules: Arc<RuleSet>,
    on_error: Option<ErrorHook>,
}

/// Translate a rule condition into a store predicate.
///
/// Validation restricts aggregation rules to translatable operators, so
/// `None` here means a missing comparand.
fn translate_condition(condition: &Condition) -> Option<MetaPredicate> {
    match condition.operator {
        ConditionOperator::Exists => Some(MetaPredicate::Exists),
        ConditionOperator::Equals => condition.value.clone().map(MetaPredicate::Eq),
        ConditionOperator::Gt => condition.value.clone().map(MetaPredicate::Gt),
        ConditionOperator::Gte => condition.value.clone().map(MetaPredicate::Gte),
        ConditionOperator::Lt => condition.value.clone().map(MetaPredicate::Lt),
        ConditionOperator::Lte => condition.value.clone().map(MetaPredicate::Lte),
        ConditionOperator::Contains => condition
            .value
            .as_ref()
            .and_then(Value::as_str)
            .map(|s| MetaPredicate::ContainsCi(s.to_string())),
        _ => None,
    }
}

impl AggregationRuleEngine {
    pub(crate) fn new(
        config: Arc<Config>,
        store: Arc<dyn DocumentStore>,
        rules: Arc<RuleSet>,
        on_error: Option<ErrorHook>,
    ) -> Self {
        Self {
            config,
            store,
            rules,
            on_error,
        }
    }

    /// Evaluate all aggregation rules against one enriched audit record.
    ///
    /// Per-rule failures are swallowed; they never affect other rules or
    /// the audit write that already happened.
    pub(crate) async fn evaluate(&self, record: &Value) {
        for rule in &self.rules.aggregation_rules {
            if !event_matches_rule(record, rule) {
                continue;
            }
            let Some(entity) = entity_value(record, &rule.entity_property) else {
                continue;
            };
            let Some(collection) = self.config.entity_collections.get(&rule.entity_property)
            else {
                tracing::debug!(
                    rule_id = %rule.id,
                    entity_property = %rule.entity_property,
                    "no collection mapped for entity property, skipping rule"
                );
                continue;
            };

            if let Err(err) = self.evaluate_rule(rule, &entity, collection).await {
                tracing::warn!(rule_id = %rule.id, error = %err, "aggregation rule failed");
                report_error(&self.on_error, &err, record);
            }
        }
    }

    async fn evaluate_rule(
        &self,
        rule: &AggregationRule,
        entity: &str,
        alert_collection: &str,
    ) -> Result<(), EngineError> {
        let (start, end) = rule.period.window(Utc::now());

        let mut query = MetaQuery::new()
            .eq(rule.entity_property.clone(), entity)
            .with(
                "occurredAt",
                MetaPredicate::Between {
                    gte: start.to_rfc3339().into(),
                    lte: end.to_rfc3339().into(),
                },
            );
        for condition in &rule.conditions {
            let Some(predicate) = translate_condition(condition) else {
                return Err(EngineError::Config(format!(
                    "aggregation rule '{}' condition on '{}' has no comparand",
                    rule.id, condition.field
                )));
            };
            query = query.with(condition.field.clone(), predicate);
        }

        let matching = self
            .store
            .list_by_meta(&self.config.collections.auditlogs, &query, None)
            .await?;
        let count = matching.len() as u64;

        if count < rule.threshold {
            return Ok(());
        }

        let output = build_output(rule, count, entity);
        let output_kind = match &output {
            magpie_rules::AggregationOutput::Risk(_) => "risk",
            magpie_rules::AggregationOutput::Insight(_) => "insight",
        };
        let alert = json!({
            "type": "aggregation-alert",
            "ruleId": rule.id,
            "ruleName": rule.name,
            "entityProperty": rule.entity_property,
            "entityValue": entity,
            "period": rule.period.to_string(),
            "count": count,
            "threshold": rule.threshold,
            "output": output,
            "triggeredAt": Utc::now().to_rfc3339(),
            "timeWindow": {
                "start": start.to_rfc3339(),
                "end": end.to_rfc3339(),
            },
            "service": self.config.service,
            "env": self.config.env_name,
        });

        tracing::info!(
            rule_id = %rule.id,
            entity,
            count,
            threshold = rule.threshold,
            "aggregation rule fired"
        );

        self.store
            .create(
                alert_collection,
                alert,
                &self.config.service,
                &format!("aggregation-rule:{output_kind}"),
            )
            .await?;
        Ok(())
    }
}
