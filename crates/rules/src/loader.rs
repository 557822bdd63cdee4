//! Filesystem rule loader.
//!
//! Reads every `.yml`/`.yaml` file in a directory into one merged
//! `RuleSet`, then validates the whole set. Loading is one-shot; callers
//! that want fresh rules re-run the loader and swap the set.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::schema::{AggregationRule, EventRule};
use crate::validation::validate_rule_set;

/// Errors that can occur during rule loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// One rule file: any mix of event and aggregation rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RuleFile {
    #[serde(default)]
    pub event_rules: Vec<EventRule>,
    #[serde(default)]
    pub aggregation_rules: Vec<AggregationRule>,
}

/// The merged, validated rule configuration the engine runs with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub event_rules: Vec<EventRule>,
    pub aggregation_rules: Vec<AggregationRule>,
}

impl RuleSet {
    /// Build a rule set directly from in-memory rules, validating it.
    pub fn new(
        event_rules: Vec<EventRule>,
        aggregation_rules: Vec<AggregationRule>,
    ) -> Result<Self, RuleError> {
        validate_rule_set(&event_rules, &aggregation_rules)?;
        Ok(Self {
            event_rules,
            aggregation_rules,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.event_rules.is_empty() && self.aggregation_rules.is_empty()
    }
}

/// Parse one YAML document into a validated rule set.
pub fn parse_rules(text: &str) -> Result<RuleSet, RuleError> {
    let file: RuleFile = serde_yaml::from_str(text)?;
    RuleSet::new(file.event_rules, file.aggregation_rules)
}

/// Load and merge all YAML rule files in a directory.
///
/// Non-YAML files are skipped; a missing directory yields an empty set.
pub fn load_rules_dir(dir: impl AsRef<Path>) -> Result<RuleSet, RuleError> {
    let dir = dir.as_ref();
    if !dir.exists() {
        warn!(dir = %dir.display(), "rules directory missing, starting with empty rule set");
        return Ok(RuleSet::default());
    }

    let mut merged = RuleFile::default();
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yml") | Some("yaml")
            )
        })
        .collect();
    entries.sort();

    for path in entries {
        let text = fs::read_to_string(&path)?;
        let file: RuleFile = serde_yaml::from_str(&text)?;
        info!(
            file = %path.display(),
            event_rules = file.event_rules.len(),
            aggregation_rules = file.aggregation_rules.len(),
            "loaded rule file"
        );
        merged.event_rules.extend(file.event_rules);
        merged.aggregation_rules.extend(file.aggregation_rules);
    }

    RuleSet::new(merged.event_rules, merged.aggregation_rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EVENT_RULES_YAML: &str = r#"
eventRules:
  - id: failed-login
    name: Failed Login
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
      text: Failed login attempt
"#;

    const AGG_RULES_YAML: &str = r#"
aggregationRules:
  - id: brute-force
    name: Brute Force
    entityProperty: userId
    period: minute
    threshold: 5
    conditions:
      - field: outcome
        operator: equals
        value: failure
    output:
      type: risk
      severity: high
      text: "{count} failed logins for {entity} in one {period}"
"#;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn merges_rules_across_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "events.yaml", EVENT_RULES_YAML);
        write_file(tmp.path(), "aggregations.yml", AGG_RULES_YAML);
        write_file(tmp.path(), "notes.txt", "not a rule file");

        let set = load_rules_dir(tmp.path()).unwrap();
        assert_eq!(set.event_rules.len(), 1);
        assert_eq!(set.aggregation_rules.len(), 1);
        assert_eq!(set.event_rules[0].id, "failed-login");
    }

    #[test]
    fn missing_directory_yields_empty_set() {
        let set = load_rules_dir("/definitely/not/a/real/dir").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn duplicate_ids_across_files_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "a.yaml", EVENT_RULES_YAML);
        write_file(tmp.path(), "b.yaml", EVENT_RULES_YAML);

        let err = load_rules_dir(tmp.path()).unwrap_err();
        assert!(matches!(err, RuleError::Validation(_)));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "bad.yaml", "eventRules: [{nope");
        assert!(matches!(load_rules_dir(tmp.path()), Err(RuleError::Parse(_))));
    }
}
