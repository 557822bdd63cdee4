//! Engine configuration.
//!
//! All knobs are explicit struct fields. `Config::from_env()` reads
//! `MAGPIE_*` env vars once at load time (call `load_dotenv()` first);
//! nothing in the engine touches the process environment afterwards.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => v == "true" || v == "1",
        Err(_) => default,
    }
}

// ── Collection names ──────────────────────────────────────────

/// Store collection names, one per record kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collections {
    pub logs: String,
    pub auditlogs: String,
    pub activities: String,
    pub errors: String,
    pub users: String,
    pub ips: String,
    pub machines: String,
    pub domains: String,
    pub activity_types: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            logs: "logs".to_string(),
            auditlogs: "auditlogs".to_string(),
            activities: "activities".to_string(),
            errors: "errors".to_string(),
            users: "users".to_string(),
            ips: "ips".to_string(),
            machines: "machines".to_string(),
            domains: "domains".to_string(),
            activity_types: "activity_types".to_string(),
        }
    }
}

// ── Behavior enums ────────────────────────────────────────────

/// What to do with a response whose request was never seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnboundResponseHandling {
    /// Create only an error record.
    Errors,
    /// Create only a best-effort activity record flagged `missingStart`.
    Activities,
    /// Create both records.
    #[default]
    Both,
    /// Create neither.
    Drop,
}

/// How audit records are linked back to activity records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityLinking {
    JobId,
    CorrelationId,
    #[default]
    Both,
    None,
}

// ── Top-level config ──────────────────────────────────────────

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name stamped onto every persisted record.
    pub service: String,
    /// Deployment environment name (e.g. "production", "staging").
    pub env_name: String,
    pub collections: Collections,
    /// Maximum concurrently executing units of work; excess calls are dropped.
    pub max_in_flight: usize,
    /// Schedule units of work without awaiting them.
    pub fire_and_forget: bool,
    /// Cap for deduplicated set unions on entity aggregates.
    pub max_set_size: usize,
    /// Capacity of the in-memory job correlation cache (FIFO eviction).
    pub job_cache_capacity: usize,
    pub unbound_response_handling: UnboundResponseHandling,
    pub activity_linking: ActivityLinking,
    /// Master switch for entity aggregates and aggregation rules.
    pub aggregations_enabled: bool,
    /// Entity property path → collection name, for aggregation-rule alerts.
    pub entity_collections: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: "magpie".to_string(),
            env_name: "production".to_string(),
            collections: Collections::default(),
            max_in_flight: 100,
            fire_and_forget: true,
            max_set_size: 1000,
            job_cache_capacity: 10_000,
            unbound_response_handling: UnboundResponseHandling::default(),
            activity_linking: ActivityLinking::default(),
            aggregations_enabled: true,
            entity_collections: Self::default_entity_collections(),
        }
    }
}

impl Config {
    /// Build config from `MAGPIE_*` env vars (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service: env_or("MAGPIE_SERVICE", &defaults.service),
            env_name: env_or("MAGPIE_ENV", &defaults.env_name),
            max_in_flight: env_usize("MAGPIE_MAX_IN_FLIGHT", defaults.max_in_flight),
            fire_and_forget: env_bool("MAGPIE_FIRE_AND_FORGET", defaults.fire_and_forget),
            max_set_size: env_usize("MAGPIE_MAX_SET_SIZE", defaults.max_set_size),
            job_cache_capacity: env_usize("MAGPIE_JOB_CACHE_CAPACITY", defaults.job_cache_capacity),
            ..defaults
        }
    }

    /// Default mapping of entity property paths to collection names.
    pub fn default_entity_collections() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("userId".to_string(), "users".to_string());
        map.insert("appId".to_string(), "users".to_string());
        map.insert("data.ip".to_string(), "ips".to_string());
        map.insert("ip".to_string(), "ips".to_string());
        map.insert("machine".to_string(), "machines".to_string());
        map.insert("domain".to_string(), "domains".to_string());
        map.insert("action".to_string(), "activity_types".to_string());
        map
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  service:       {}", self.service);
        tracing::info!("  env:           {}", self.env_name);
        tracing::info!(
            "  dispatch:      max_in_flight={}, fire_and_forget={}",
            self.max_in_flight,
            self.fire_and_forget
        );
        tracing::info!(
            "  aggregations:  enabled={}, max_set_size={}",
            self.aggregations_enabled,
            self.max_set_size
        );
        tracing::info!(
            "  activities:    linking={:?}, unbound={:?}, cache_capacity={}",
            self.activity_linking,
            self.unbound_response_handling,
            self.job_cache_capacity
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_in_flight, 100);
        assert!(cfg.fire_and_forget);
        assert_eq!(cfg.max_set_size, 1000);
        assert_eq!(cfg.unbound_response_handling, UnboundResponseHandling::Both);
        assert_eq!(cfg.activity_linking, ActivityLinking::Both);
        assert!(cfg.aggregations_enabled);
        assert_eq!(cfg.collections.auditlogs, "auditlogs");
    }

    #[test]
    fn entity_collection_defaults_cover_all_kinds() {
        let map = Config::default_entity_collections();
        assert_eq!(map.get("userId").map(String::as_str), Some("users"));
        assert_eq!(map.get("data.ip").map(String::as_str), Some("ips"));
        assert_eq!(map.get("action").map(String::as_str), Some("activity_types"));
    }
}
