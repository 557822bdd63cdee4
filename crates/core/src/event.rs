//! Audit event types and per-call log metadata.

use serde::{Deserialize, Serialize};

/// Where a record originated. Records from the store layer itself are
/// never re-submitted into the engine (anti-recursion rule).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    #[default]
    Application,
    Store,
    Internal,
}

/// Level of a plain log record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Per-call metadata accompanying an event submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub source: Source,
    /// Additional caller-supplied fields, stored under `meta` on the record.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reference linking an event to an asynchronous activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Target of an audited action (e.g. the document a user modified).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A structured audit record submitted by a caller.
///
/// `app_id` and `user_id` are mandatory; everything else is optional.
/// Enrichment fields (risks/insights) are appended by the engine and are
/// not part of the submitted event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub app_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_ref: Option<ActivityRef>,
}

impl AuditEvent {
    /// Minimal event with the two mandatory identity fields.
    pub fn new(app_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_camel_case() {
        let mut event = AuditEvent::new("app1", "u1");
        event.action = Some("login".to_string());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["appId"], "app1");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["action"], "login");
        // Optional fields are omitted, not null
        assert!(json.get("resource").is_none());
    }

    #[test]
    fn source_default_is_application() {
        let meta = LogMeta::default();
        assert_eq!(meta.source, Source::Application);
        let parsed: Source = serde_json::from_str("\"store\"").unwrap();
        assert_eq!(parsed, Source::Store);
    }

    #[test]
    fn log_meta_flattens_extra_fields() {
        let raw = serde_json::json!({
            "tenantId": "t1",
            "requestIp": "10.0.0.1"
        });
        let meta: LogMeta = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.tenant_id.as_deref(), Some("t1"));
        assert_eq!(meta.extra["requestIp"], "10.0.0.1");
    }
}
