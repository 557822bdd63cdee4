//! Asynchronous activity (request/response) types.
//!
//! An activity represents one unit of asynchronous work: a request creates
//! an `in-progress` record keyed by `job_id`, and the matching response
//! later transitions it to `completed` or `failed`.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityStatus {
    InProgress,
    Completed,
    Failed,
    Unbound,
    Unknown,
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityStatus::InProgress => write!(f, "in-progress"),
            ActivityStatus::Completed => write!(f, "completed"),
            ActivityStatus::Failed => write!(f, "failed"),
            ActivityStatus::Unbound => write!(f, "unbound"),
            ActivityStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Start of an asynchronous unit of work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRequest {
    pub job_id: String,
    pub request: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Optional hints for downstream analytics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Caller-chosen request status; defaults to "accepted".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_status: Option<String>,
}

/// Error payload carried by a failed activity response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Completion of an asynchronous unit of work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActivityError>,
    /// Caller override; defaults to "failed" when an error is present,
    /// otherwise "completed".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

impl ActivityResponse {
    /// Effective response status after applying the default rule.
    pub fn effective_status(&self) -> String {
        match &self.response_status {
            Some(s) => s.clone(),
            None if self.error.is_some() => "failed".to_string(),
            None => "completed".to_string(),
        }
    }

    /// Terminal lifecycle state implied by this response.
    pub fn terminal_status(&self) -> ActivityStatus {
        if self.error.is_some() {
            ActivityStatus::Failed
        } else {
            ActivityStatus::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_kebab_case() {
        let s = serde_json::to_string(&ActivityStatus::InProgress).unwrap();
        assert_eq!(s, "\"in-progress\"");
    }

    #[test]
    fn response_status_defaults_from_error() {
        let ok = ActivityResponse {
            job_id: "j1".to_string(),
            ..Default::default()
        };
        assert_eq!(ok.effective_status(), "completed");
        assert_eq!(ok.terminal_status(), ActivityStatus::Completed);

        let failed = ActivityResponse {
            job_id: "j1".to_string(),
            error: Some(ActivityError {
                message: "boom".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(failed.effective_status(), "failed");
        assert_eq!(failed.terminal_status(), ActivityStatus::Failed);
    }

    #[test]
    fn response_status_override_wins() {
        let res = ActivityResponse {
            job_id: "j1".to_string(),
            response_status: Some("timeout".to_string()),
            ..Default::default()
        };
        assert_eq!(res.effective_status(), "timeout");
    }
}
