//! Shared data model and configuration for the magpie enrichment engine.
//!
//! This crate provides:
//! - Audit event and activity request/response types
//! - Risk/insight annotation types produced by the rules engine
//! - Engine configuration with env-derived defaults

pub mod activity;
pub mod annotations;
pub mod config;
pub mod event;

pub use activity::*;
pub use annotations::*;
pub use config::{load_dotenv, ActivityLinking, Collections, Config, UnboundResponseHandling};
pub use event::*;
