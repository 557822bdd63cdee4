//! The asynchronous audit pipeline: persist, link, aggregate, detect.
//!
//! Runs after the synchronous enrichment already happened. Every stage
//! after the primary write is best-effort: a linking or aggregate failure
//! is reported through the error hook and logged, never propagated.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use magpie_core::{ActivityLinking, AuditEvent, Config, LogMeta};
use magpie_rules::RuleSet;
use magpie_store::{Attribution, DocumentStore, MetaQuery, StoredDocument};

use crate::agg_rules::AggregationRuleEngine;
use crate::aggregates::AggregateUpdater;
use crate::error::EngineError;
use crate::record::{merge_set, report_error, ErrorHook};

const AUDIT_FUNCTION_ID: &str = "magpie@auditlogs";

pub(crate) struct AuditPipeline {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    aggregates: AggregateUpdater,
    aggregation_rules: AggregationRuleEngine,
    on_error: Option<ErrorHook>,
}

impl AuditPipeline {
    pub(crate) fn new(
        config: Arc<Config>,
        store: Arc<dyn DocumentStore>,
        rules: Arc<RuleSet>,
        on_error: Option<ErrorHook>,
    ) -> Self {
        let aggregates =
            AggregateUpdater::new(Arc::clone(&config), Arc::clone(&store), on_error.clone());
        let aggregation_rules = AggregationRuleEngine::new(
            Arc::clone(&config),
            Arc::clone(&store),
            rules,
            on_error.clone(),
        );
        Self {
            config,
            store,
            aggregates,
            aggregation_rules,
            on_error,
        }
    }

    /// Run the full pipeline for one enriched audit record.
    pub(crate) async fn process(&self, record: Value, event: AuditEvent, meta: LogMeta) {
        let created = match self
            .store
            .create(
                &self.config.collections.auditlogs,
                record.clone(),
                &self.config.service,
                "audit-event",
            )
            .await
        {
            Ok(created) => created,
            Err(err) => {
                let err = EngineError::from(err);
                tracing::error!(error = %err, "audit write failed");
                report_error(&self.on_error, &err, &record);
                return;
            }
        };

        if let Err(err) = self.link_activity(&created.id, &event, &meta).await {
            tracing::warn!(audit_id = %created.id, error = %err, "activity linking failed");
            report_error(&self.on_error, &err, &record);
        }

        if self.config.aggregations_enabled {
            self.aggregates.update_all(&event, &record).await;
            self.aggregation_rules.evaluate(&record).await;
        }
    }

    /// Cross-link the audit record and its activity, when one is found.
    ///
    /// The audit record gains an `activityRef`; the activity accumulates
    /// audit document ids in `auditRefs` (deduplicated, capped).
    async fn link_activity(
        &self,
        audit_id: &str,
        event: &AuditEvent,
        meta: &LogMeta,
    ) -> Result<(), EngineError> {
        let strategy = self.config.activity_linking;
        if strategy == ActivityLinking::None {
            return Ok(());
        }

        let job_id = event
            .activity_ref
            .as_ref()
            .and_then(|r| r.job_id.clone())
            .or_else(|| {
                event
                    .data
                    .as_ref()
                    .and_then(|d| d.get("jobId"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        let by_job = matches!(strategy, ActivityLinking::JobId | ActivityLinking::Both);
        let by_correlation = matches!(
            strategy,
            ActivityLinking::CorrelationId | ActivityLinking::Both
        );

        let mut activity: Option<StoredDocument> = None;
        if by_job {
            if let Some(job_id) = &job_id {
                activity = self.find_activity("jobId", job_id).await?;
            }
        }
        if activity.is_none() && by_correlation {
            if let Some(correlation_id) = &meta.correlation_id {
                activity = self.find_activity("correlationId", correlation_id).await?;
            }
        }

        let Some(activity) = activity else {
            return Ok(());
        };

        let activity_job_id = activity.body.get("jobId").cloned().unwrap_or(Value::Null);
        self.store
            .enrich(
                &self.config.collections.auditlogs,
                audit_id,
                json!({
                    "activityRef": { "id": activity.id, "jobId": activity_job_id }
                }),
                Attribution::new(AUDIT_FUNCTION_ID, &self.config.service, "activity-link"),
            )
            .await?;

        let existing = activity
            .body
            .get("auditRefs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let refs = merge_set(
            existing,
            &[audit_id.to_string()],
            self.config.max_set_size,
        );
        let mut patch = Map::new();
        patch.insert("auditRefs".to_string(), Value::Array(refs));
        self.store
            .enrich(
                &self.config.collections.activities,
                &activity.id,
                Value::Object(patch),
                Attribution::new(AUDIT_FUNCTION_ID, &self.config.service, "activity-link"),
            )
            .await?;
        Ok(())
    }

    async fn find_activity(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<StoredDocument>, EngineError> {
        let mut docs = self
            .store
            .list_by_meta(
                &self.config.collections.activities,
                &MetaQuery::new().eq(field, value),
                Some(1),
            )
            .await?;
        Ok(if docs.is_empty() {
            None
        } else {
            Some(docs.remove(0))
        })
    }
}
