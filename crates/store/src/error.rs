use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("store backend error: {0}")]
    Backend(String),
}
