//! The `DocumentStore` trait and its associated record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::query::MetaQuery;

/// Identifier returned by a successful `create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Created {
    pub id: String,
}

/// Attribution recorded alongside an `enrich`, for the store's own audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    /// Identifier of the code path applying the update (e.g. "magpie@user-aggregate").
    pub function_id: String,
    /// Acting service or component.
    pub actor: String,
    /// Short machine-readable reason tag (e.g. "user:update").
    pub reason: String,
}

impl Attribution {
    pub fn new(
        function_id: impl Into<String>,
        actor: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            function_id: function_id.into(),
            actor: actor.into(),
            reason: reason.into(),
        }
    }
}

/// A document returned from `list_by_meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// The document body as stored (JSON object).
    pub body: serde_json::Value,
}

impl StoredDocument {
    /// Look up a top-level field on the body.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.body.get(key)
    }
}

/// Narrow persistence interface consumed by the engine.
///
/// Implementations handle durability, versioning, and indexing. The engine
/// only appends documents, applies attributed partial updates, and runs
/// predicate queries (point lookups and windowed counts).
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append a new document to a collection, returning its identifier.
    async fn create(
        &self,
        collection: &str,
        record: serde_json::Value,
        actor: &str,
        reason: &str,
    ) -> Result<Created, StoreError>;

    /// Apply a partial update to an existing document.
    ///
    /// Top-level patch keys replace the corresponding fields; dotted keys
    /// (`counts.byAction.login`) address nested fields, creating
    /// intermediate objects as needed.
    async fn enrich(
        &self,
        collection: &str,
        id: &str,
        patch: serde_json::Value,
        attribution: Attribution,
    ) -> Result<(), StoreError>;

    /// Return documents whose fields match every predicate in `query`,
    /// in insertion order, up to `limit`.
    async fn list_by_meta(
        &self,
        collection: &str,
        query: &MetaQuery,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StoreError>;
}
