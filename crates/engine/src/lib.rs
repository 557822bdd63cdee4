//! The magpie enrichment engine.
//!
//! Callers submit audit events and activity request/response pairs. Each
//! submission is enriched synchronously (rule annotations, common
//! metadata) and then dispatched as a bounded asynchronous unit of work
//! that persists the record, cross-links activities, maintains entity
//! aggregates, and evaluates time-windowed aggregation rules.
//!
//! The only errors surfaced to callers are missing mandatory fields on
//! the synchronous path. Everything downstream is best-effort: failures
//! are logged and reported through the optional error hook.

mod activity;
mod agg_rules;
mod aggregates;
mod audit;
mod dispatch;
mod error;
mod record;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};

use magpie_core::{
    ActivityRequest, ActivityResponse, AuditEvent, Config, LogLevel, LogMeta, RuleOutcome,
};
use magpie_rules::RuleSet;
use magpie_store::DocumentStore;

use crate::activity::ActivityCorrelator;
use crate::audit::AuditPipeline;
use crate::dispatch::Dispatcher;
use crate::record::{common_meta, is_store_origin, report_error};

pub use crate::error::EngineError;
pub use crate::record::ErrorHook;

/// The engine facade. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Magpie {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    rules: Arc<RuleSet>,
    dispatcher: Arc<Dispatcher>,
    pipeline: Arc<AuditPipeline>,
    correlator: Arc<ActivityCorrelator>,
    on_error: Option<ErrorHook>,
}

impl Magpie {
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        rules: RuleSet,
    ) -> Result<Self, EngineError> {
        Self::with_error_hook(config, store, rules, None)
    }

    /// Like [`Magpie::new`], with a callback invoked whenever an
    /// asynchronous unit of work fails.
    pub fn with_error_hook(
        config: Config,
        store: Arc<dyn DocumentStore>,
        rules: RuleSet,
        on_error: Option<ErrorHook>,
    ) -> Result<Self, EngineError> {
        // Re-validate: rule sets built by hand bypass the loader.
        magpie_rules::validate_rule_set(&rules.event_rules, &rules.aggregation_rules)?;

        let config = Arc::new(config);
        let rules = Arc::new(rules);
        let dispatcher = Arc::new(Dispatcher::new(
            config.max_in_flight,
            config.fire_and_forget,
        ));
        let pipeline = Arc::new(AuditPipeline::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&rules),
            on_error.clone(),
        ));
        let correlator = Arc::new(ActivityCorrelator::new(
            Arc::clone(&config),
            Arc::clone(&store),
        ));

        config.log_summary();
        Ok(Self {
            config,
            store,
            rules,
            dispatcher,
            pipeline,
            correlator,
            on_error,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Currently executing asynchronous units of work.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Evaluate the event rules against an arbitrary record without
    /// persisting anything.
    pub fn apply_event_rules(&self, record: &Value) -> RuleOutcome {
        magpie_rules::apply_event_rules(record, &self.rules.event_rules)
    }

    /// Submit an audit event.
    ///
    /// Validates mandatory fields, enriches the record synchronously, and
    /// dispatches the persistence pipeline. Returns `Ok` even when the
    /// in-flight bound drops the work; only validation fails the call.
    pub async fn log_audit(&self, event: AuditEvent, meta: LogMeta) -> Result<(), EngineError> {
        if event.app_id.is_empty() {
            return Err(EngineError::MissingField("appId"));
        }
        if event.user_id.is_empty() {
            return Err(EngineError::MissingField("userId"));
        }
        if is_store_origin(&meta) {
            tracing::debug!("skipping store-origin audit event");
            return Ok(());
        }

        let record = self.build_audit_record(&event, &meta)?;

        let pipeline = Arc::clone(&self.pipeline);
        let task_record = record.clone();
        let accepted = self
            .dispatcher
            .dispatch(async move {
                pipeline.process(task_record, event, meta).await;
            })
            .await;
        if !accepted {
            tracing::debug!("audit event dropped by in-flight bound");
        }
        Ok(())
    }

    /// Persist a plain structured log record.
    ///
    /// Same contract as [`Magpie::log_audit`]: validated synchronously,
    /// enriched with rule annotations and common metadata, then dispatched
    /// under the in-flight bound. Store-origin submissions are ignored.
    pub async fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        meta: LogMeta,
    ) -> Result<(), EngineError> {
        let message = message.into();
        if message.is_empty() {
            return Err(EngineError::MissingField("message"));
        }
        if is_store_origin(&meta) {
            tracing::debug!("skipping store-origin log record");
            return Ok(());
        }

        let mut record = Map::new();
        record.insert("type".to_string(), "log".into());
        record.insert("level".to_string(), serde_json::to_value(level)?);
        record.insert("message".to_string(), message.into());
        record.insert("occurredAt".to_string(), Utc::now().to_rfc3339().into());
        record.extend(common_meta(&self.config, &meta));

        let mut value = Value::Object(record);
        self.annotate(&mut value)?;

        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let on_error = self.on_error.clone();
        self.dispatcher
            .dispatch(async move {
                if let Err(err) = store
                    .create(
                        &config.collections.logs,
                        value.clone(),
                        &config.service,
                        "log-write",
                    )
                    .await
                {
                    let err = EngineError::from(err);
                    tracing::warn!(error = %err, "log write failed");
                    report_error(&on_error, &err, &value);
                }
            })
            .await;
        Ok(())
    }

    /// Submit the start of an asynchronous unit of work.
    pub async fn log_activity_request(
        &self,
        request: ActivityRequest,
        meta: LogMeta,
    ) -> Result<(), EngineError> {
        if request.job_id.is_empty() {
            return Err(EngineError::MissingField("jobId"));
        }

        let correlator = Arc::clone(&self.correlator);
        let on_error = self.on_error.clone();
        self.dispatcher
            .dispatch(async move {
                if let Err(err) = correlator.log_request(&request, &meta).await {
                    tracing::warn!(job_id = %request.job_id, error = %err, "activity request failed");
                    report_error(&on_error, &err, &request.request);
                }
            })
            .await;
        Ok(())
    }

    /// Submit the completion of an asynchronous unit of work.
    pub async fn log_activity_response(
        &self,
        response: ActivityResponse,
        meta: LogMeta,
    ) -> Result<(), EngineError> {
        if response.job_id.is_empty() {
            return Err(EngineError::MissingField("jobId"));
        }

        let correlator = Arc::clone(&self.correlator);
        let on_error = self.on_error.clone();
        self.dispatcher
            .dispatch(async move {
                if let Err(err) = correlator.log_response(&response, &meta).await {
                    tracing::warn!(job_id = %response.job_id, error = %err, "activity response failed");
                    let detail = response.response.clone().unwrap_or(Value::Null);
                    report_error(&on_error, &err, &detail);
                }
            })
            .await;
        Ok(())
    }

    /// Wait until all outstanding units of work have completed.
    ///
    /// Returns `false` on timeout; the work keeps running either way.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.dispatcher.flush(timeout).await
    }

    /// Serialize and enrich the event into the record to persist.
    fn build_audit_record(
        &self,
        event: &AuditEvent,
        meta: &LogMeta,
    ) -> Result<Value, EngineError> {
        let mut record = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        record.insert("type".to_string(), "audit".into());
        if !record.contains_key("severity") {
            record.insert("severity".to_string(), "info".into());
        }
        // Stamp in one format so windowed range queries compare cleanly.
        let occurred_at = event.occurred_at.unwrap_or_else(Utc::now);
        record.insert("occurredAt".to_string(), occurred_at.to_rfc3339().into());
        record.extend(common_meta(&self.config, meta));

        let mut value = Value::Object(record);
        self.annotate(&mut value)?;
        Ok(value)
    }

    /// Attach risk/insight annotations from the event rules, when any fire.
    fn annotate(&self, value: &mut Value) -> Result<(), EngineError> {
        let outcome = magpie_rules::apply_event_rules(value, &self.rules.event_rules);
        if outcome.is_empty() {
            return Ok(());
        }
        if let Value::Object(map) = value {
            if !outcome.risks.is_empty() {
                map.insert("risks".to_string(), serde_json::to_value(&outcome.risks)?);
            }
            if !outcome.insights.is_empty() {
                map.insert(
                    "insights".to_string(),
                    serde_json::to_value(&outcome.insights)?,
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_store::MemoryStore;

    fn engine() -> Magpie {
        let store = Arc::new(MemoryStore::default());
        let rules = RuleSet::default();
        Magpie::new(Config::default(), store, rules).unwrap()
    }

    #[tokio::test]
    async fn audit_requires_identity_fields() {
        let engine = engine();
        let err = engine
            .log_audit(AuditEvent::new("", "u1"), LogMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingField("appId")));

        let err = engine
            .log_audit(AuditEvent::new("app1", ""), LogMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingField("userId")));
    }

    #[tokio::test]
    async fn log_requires_a_message() {
        let engine = engine();
        let err = engine
            .log(LogLevel::Info, "", LogMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingField("message")));
    }

    #[tokio::test]
    async fn activity_entry_points_require_job_id() {
        let engine = engine();
        let err = engine
            .log_activity_request(ActivityRequest::default(), LogMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingField("jobId")));

        let err = engine
            .log_activity_response(ActivityResponse::default(), LogMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingField("jobId")));
    }

    #[test]
    fn audit_record_gets_defaults() {
        let engine = engine();
        let record = engine
            .build_audit_record(&AuditEvent::new("app1", "u1"), &LogMeta::default())
            .unwrap();
        assert_eq!(record["type"], "audit");
        assert_eq!(record["severity"], "info");
        assert!(record.get("occurredAt").is_some());
        assert_eq!(record["service"], "magpie");
    }
}
