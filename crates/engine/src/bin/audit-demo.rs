//! End-to-end demo: a brute-force login scenario against the in-memory
//! store, with an event rule flagging failures and an aggregation rule
//! firing once the failure count crosses the threshold.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use magpie_core::{AuditEvent, Config, LogMeta};
use magpie_engine::Magpie;
use magpie_rules::{load_rules_dir, parse_rules};
use magpie_store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "audit-demo", about = "Run a canned brute-force scenario")]
struct Args {
    /// Directory of YAML rule files; falls back to built-in demo rules.
    #[arg(long)]
    rules_dir: Option<String>,

    /// Number of failed login events to submit.
    #[arg(long, default_value_t = 6)]
    failures: u32,
}

const DEMO_RULES: &str = r#"
eventRules:
  - id: failed-login
    name: Failed login
    conditions:
      - field: action
        operator: equals
        value: login
      - field: outcome
        operator: equals
        value: failure
    output:
      type: risk
      severity: medium
      text: Login attempt failed
aggregationRules:
  - id: brute-force
    name: Possible brute force
    entityProperty: userId
    period: hour
    threshold: 5
    conditions:
      - field: outcome
        operator: equals
        value: failure
    output:
      type: risk
      severity: high
      text: "{count} failed logins for {entity} in the last {period}"
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    magpie_core::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    let rules = match &args.rules_dir {
        Some(dir) => load_rules_dir(dir)?,
        None => parse_rules(DEMO_RULES)?,
    };

    let store = Arc::new(MemoryStore::default());
    let engine = Magpie::new(config, store.clone(), rules)?;

    let meta = LogMeta {
        tenant_id: Some("acme".to_string()),
        ..Default::default()
    };

    for attempt in 0..args.failures {
        let mut event = AuditEvent::new("portal", "mallory");
        event.action = Some("login".to_string());
        event.outcome = Some("failure".to_string());
        event.data = Some(json!({ "ip": "203.0.113.7", "attempt": attempt }));
        engine.log_audit(event, meta.clone()).await?;
    }

    if !engine.flush(Duration::from_secs(5)).await {
        tracing::warn!("flush timed out with work outstanding");
    }

    tracing::info!("audit records:   {}", store.count("auditlogs"));
    tracing::info!("user aggregates: {}", store.count("users"));
    tracing::info!("ip aggregates:   {}", store.count("ips"));
    for doc in store.dump("users") {
        if doc.body.get("type").and_then(|v| v.as_str()) == Some("aggregation-alert") {
            tracing::info!(alert = %doc.body, "brute-force aggregation alert");
        }
    }

    Ok(())
}
