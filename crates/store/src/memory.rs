//! In-memory `DocumentStore` for tests and demos.
//!
//! Collections are plain vectors behind a `std::sync::RwLock`; the lock is
//! never held across an await point. Predicate matching and dotted-path
//! patch merges behave like a real document store, minus durability.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::query::MetaQuery;
use crate::store::{Attribution, Created, DocumentStore, StoredDocument};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<StoredDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection (test helper).
    pub fn dump(&self, collection: &str) -> Vec<StoredDocument> {
        self.collections
            .read()
            .ok()
            .and_then(|c| c.get(collection).cloned())
            .unwrap_or_default()
    }

    /// Number of documents in a collection (test helper).
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .ok()
            .map_or(0, |c| c.get(collection).map_or(0, Vec::len))
    }
}

/// Merge a patch into a document body. Dotted keys address nested fields,
/// creating intermediate objects as needed; other keys replace top-level.
fn apply_patch(body: &mut Value, patch: Value) -> Result<(), StoreError> {
    let Value::Object(entries) = patch else {
        return Err(StoreError::Serialize("patch must be a JSON object".to_string()));
    };

    for (key, value) in entries {
        if let Some((head, rest)) = key.split_once('.') {
            let target = body
                .as_object_mut()
                .ok_or_else(|| StoreError::Serialize("document body is not an object".to_string()))?
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            apply_patch(target, Value::Object([(rest.to_string(), value)].into_iter().collect()))?;
        } else {
            body.as_object_mut()
                .ok_or_else(|| StoreError::Serialize("document body is not an object".to_string()))?
                .insert(key, value);
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn create(
        &self,
        collection: &str,
        record: Value,
        _actor: &str,
        _reason: &str,
    ) -> Result<Created, StoreError> {
        let id = Uuid::new_v4().to_string();
        let doc = StoredDocument {
            id: id.clone(),
            created_at: Utc::now(),
            body: record,
        };
        self.collections
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(Created { id })
    }

    async fn enrich(
        &self,
        collection: &str,
        id: &str,
        patch: Value,
        _attribution: Attribution,
    ) -> Result<(), StoreError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let doc = docs
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::DocumentNotFound(id.to_string()))?;
        apply_patch(&mut doc.body, patch)
    }

    async fn list_by_meta(
        &self,
        collection: &str,
        query: &MetaQuery,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
        let mut out: Vec<StoredDocument> = Vec::new();
        for doc in docs {
            if query.matches(&doc.body) {
                out.push(doc.clone());
                if limit.is_some_and(|max| out.len() >= max) {
                    break;
                }
            }
        }
        tracing::trace!(collection, matched = out.len(), "list_by_meta scan");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_query_by_field() {
        let store = MemoryStore::new();
        store
            .create("auditlogs", json!({"userId": "u1", "action": "login"}), "test", "audit:create")
            .await
            .unwrap();
        store
            .create("auditlogs", json!({"userId": "u2", "action": "login"}), "test", "audit:create")
            .await
            .unwrap();

        let hits = store
            .list_by_meta("auditlogs", &MetaQuery::new().eq("userId", "u1"), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].body["userId"], "u1");
    }

    #[tokio::test]
    async fn enrich_merges_dotted_paths() {
        let store = MemoryStore::new();
        let created = store
            .create("users", json!({"key": "a:u1:t1", "totalEvents": 1}), "test", "user:create")
            .await
            .unwrap();

        store
            .enrich(
                "users",
                &created.id,
                json!({"totalEvents": 2, "counts.byAction.login": 2}),
                Attribution::new("magpie@test", "test", "user:update"),
            )
            .await
            .unwrap();

        let doc = &store.dump("users")[0];
        assert_eq!(doc.body["totalEvents"], 2);
        assert_eq!(doc.body["counts"]["byAction"]["login"], 2);
    }

    #[tokio::test]
    async fn enrich_unknown_id_errors() {
        let store = MemoryStore::new();
        store
            .create("users", json!({"key": "k"}), "test", "user:create")
            .await
            .unwrap();
        let err = store
            .enrich(
                "users",
                "nope",
                json!({"x": 1}),
                Attribution::new("magpie@test", "test", "user:update"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn limit_bounds_results() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .create("logs", json!({"n": i, "kind": "x"}), "test", "log:create")
                .await
                .unwrap();
        }
        let hits = store
            .list_by_meta("logs", &MetaQuery::new().eq("kind", "x"), Some(2))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].body["n"], 0);
    }
}
