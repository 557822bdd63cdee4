//! Record-shaping helpers shared by the audit and activity pipelines.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Map, Value};

use magpie_core::{Config, LogMeta, Source};

use crate::error::EngineError;

/// Caller-supplied callback invoked when a unit of work fails.
///
/// Receives the error and the record that was being processed. Hook
/// panics are contained and never reach the pipeline.
pub type ErrorHook = Arc<dyn Fn(&EngineError, &Value) + Send + Sync>;

/// Invoke the hook, if any, swallowing panics.
pub(crate) fn report_error(hook: &Option<ErrorHook>, err: &EngineError, record: &Value) {
    if let Some(hook) = hook {
        let result = catch_unwind(AssertUnwindSafe(|| hook(err, record)));
        if result.is_err() {
            tracing::warn!("error hook panicked");
        }
    }
}

/// Fields stamped onto every persisted record: service, environment,
/// source, correlation/tenant ids, and sanitized caller metadata.
pub(crate) fn common_meta(config: &Config, meta: &LogMeta) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("service".to_string(), config.service.clone().into());
    out.insert("env".to_string(), config.env_name.clone().into());
    out.insert(
        "source".to_string(),
        serde_json::to_value(meta.source).unwrap_or_else(|_| "application".into()),
    );
    if let Some(correlation_id) = &meta.correlation_id {
        out.insert("correlationId".to_string(), correlation_id.clone().into());
    }
    if let Some(tenant_id) = &meta.tenant_id {
        out.insert("tenantId".to_string(), tenant_id.clone().into());
    }
    if let Some(extra) = sanitize_meta(meta) {
        out.insert("meta".to_string(), Value::Object(extra));
    }
    out
}

/// Drop internal routing hints (underscore-prefixed keys) so stored
/// documents stay clean; keep the rest of the caller's metadata.
pub(crate) fn sanitize_meta(meta: &LogMeta) -> Option<Map<String, Value>> {
    let rest: Map<String, Value> = meta
        .extra
        .iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Whether a submission should be ignored because it originated from the
/// store layer itself. Feeding those back in would loop.
pub(crate) fn is_store_origin(meta: &LogMeta) -> bool {
    meta.source == Source::Store
}

/// Merge new members into an existing set, preserving first-seen order,
/// deduplicating, and truncating to `max_size`. Entries beyond the cap
/// are dropped, not rotated.
pub(crate) fn merge_set(existing: &[Value], additions: &[String], max_size: usize) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(existing.len() + additions.len());
    for value in existing.iter().cloned() {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    for addition in additions {
        let value = Value::String(addition.clone());
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out.truncate(max_size);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn common_meta_includes_identity_fields() {
        let config = Config::default();
        let meta = LogMeta {
            tenant_id: Some("t1".to_string()),
            correlation_id: Some("c1".to_string()),
            ..Default::default()
        };
        let out = common_meta(&config, &meta);
        assert_eq!(out["service"], "magpie");
        assert_eq!(out["env"], "production");
        assert_eq!(out["source"], "application");
        assert_eq!(out["tenantId"], "t1");
        assert_eq!(out["correlationId"], "c1");
        assert!(out.get("meta").is_none());
    }

    #[test]
    fn sanitize_drops_underscore_keys() {
        let mut meta = LogMeta::default();
        meta.extra.insert("_routing".to_string(), json!("internal"));
        meta.extra.insert("requestIp".to_string(), json!("10.0.0.1"));
        let rest = sanitize_meta(&meta).unwrap();
        assert!(rest.get("_routing").is_none());
        assert_eq!(rest["requestIp"], "10.0.0.1");
    }

    #[test]
    fn merge_set_dedupes_and_caps() {
        let existing = vec![json!("a"), json!("b")];
        let merged = merge_set(&existing, &["b".to_string(), "c".to_string(), "d".to_string()], 3);
        assert_eq!(merged, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn report_error_contains_hook_panics() {
        let hook: ErrorHook = Arc::new(|_, _| panic!("bad hook"));
        report_error(
            &Some(hook),
            &EngineError::Config("x".to_string()),
            &json!({}),
        );
    }
}
