use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A synchronous entry point was called without a mandatory field.
    /// The only error surfaced to callers; downstream failures never are.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("rule error: {0}")]
    Rules(#[from] magpie_rules::RuleError),

    #[error("store error: {0}")]
    Store(#[from] magpie_store::StoreError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
