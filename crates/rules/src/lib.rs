//! Declarative rule engine for event enrichment and threshold detection.
//!
//! This crate provides:
//! - Rule schema types with serde deserialization (JSON and YAML)
//! - A fail-closed condition evaluator over nested event fields
//! - The per-event rule engine producing risk/insight annotations
//! - Aggregation-rule helpers: time windows, entity extraction, output text
//! - Filesystem loader for YAML rule files with validation

pub mod aggregation;
pub mod evaluator;
pub mod loader;
pub mod schema;
pub mod validation;

pub use aggregation::{
    build_output, entity_value, event_matches_rule, render_output_text, AggregationOutput,
};
pub use evaluator::{apply_event_rules, evaluate_condition, lookup_path, rule_matches};
pub use loader::{load_rules_dir, parse_rules, RuleError, RuleFile, RuleSet};
pub use schema::*;
pub use validation::validate_rule_set;
