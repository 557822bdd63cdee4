//! Activity correlation: matching asynchronous responses to requests.
//!
//! Requests create an `in-progress` record keyed by `jobId` and park the
//! new document id in a bounded in-process cache. Responses resolve the
//! request via the cache first, then fall back to a store lookup, and
//! finally apply the configured unbound-response policy when no request
//! can be found.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use magpie_core::{
    ActivityRequest, ActivityResponse, ActivityStatus, Config, LogMeta, UnboundResponseHandling,
};
use magpie_store::{Attribution, DocumentStore, MetaQuery, StoredDocument};

use crate::error::EngineError;
use crate::record::{common_meta, is_store_origin};

const ACTIVITY_FUNCTION_ID: &str = "magpie@activities";

#[derive(Debug, Clone)]
struct CacheEntry {
    doc_id: String,
    start: DateTime<Utc>,
}

/// Bounded jobId -> request-document cache with FIFO eviction.
///
/// Entries are single-use: a successful `take` removes the entry, so a
/// duplicate response falls through to the store lookup.
struct JobCache {
    capacity: usize,
    inner: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl JobCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheState::default()),
        }
    }

    fn insert(&self, job_id: String, entry: CacheEntry) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        if state.entries.insert(job_id.clone(), entry).is_none() {
            // A taken entry leaves its key behind in the order queue; drop
            // it so a re-insert cannot be evicted ahead of older entries.
            state.order.retain(|k| k != &job_id);
            state.order.push_back(job_id);
        }
        while state.entries.len() > self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn take(&self, job_id: &str) -> Option<CacheEntry> {
        let mut state = self.inner.lock().ok()?;
        state.entries.remove(job_id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().map(|s| s.entries.len()).unwrap_or(0)
    }
}

pub(crate) struct ActivityCorrelator {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    cache: JobCache,
}

impl ActivityCorrelator {
    pub(crate) fn new(config: Arc<Config>, store: Arc<dyn DocumentStore>) -> Self {
        let cache = JobCache::new(config.job_cache_capacity);
        Self {
            config,
            store,
            cache,
        }
    }

    /// Persist the start of an asynchronous unit of work.
    pub(crate) async fn log_request(
        &self,
        request: &ActivityRequest,
        meta: &LogMeta,
    ) -> Result<(), EngineError> {
        if request.job_id.is_empty() {
            return Err(EngineError::MissingField("jobId"));
        }
        if is_store_origin(meta) {
            tracing::debug!(job_id = %request.job_id, "skipping store-origin activity request");
            return Ok(());
        }

        let now = Utc::now();
        let mut record = Map::new();
        record.insert("type".to_string(), json!("activity"));
        record.insert("jobId".to_string(), json!(request.job_id));
        record.insert(
            "status".to_string(),
            serde_json::to_value(ActivityStatus::InProgress)
                .unwrap_or_else(|_| json!("in-progress")),
        );
        record.insert(
            "requestStatus".to_string(),
            json!(request.request_status.as_deref().unwrap_or("accepted")),
        );
        record.insert("responseStatus".to_string(), json!("pending"));
        record.insert("startTs".to_string(), json!(now.to_rfc3339()));
        record.insert("startMs".to_string(), json!(now.timestamp_millis()));
        record.insert("request".to_string(), request.request.clone());
        if let Some(context) = &request.context {
            record.insert("context".to_string(), context.clone());
        }
        if let Some(activity_meta) = &request.activity_meta {
            record.insert("activityMeta".to_string(), activity_meta.clone());
        }
        if let Some(model) = &request.model {
            record.insert("model".to_string(), json!(model));
        }
        if let Some(provider) = &request.provider {
            record.insert("provider".to_string(), json!(provider));
        }
        if let Some(user_id) = &request.user_id {
            record.insert("userId".to_string(), json!(user_id));
        }
        record.extend(common_meta(&self.config, meta));

        let created = self
            .store
            .create(
                &self.config.collections.activities,
                Value::Object(record),
                &self.config.service,
                "activity-request",
            )
            .await?;

        self.cache.insert(
            request.job_id.clone(),
            CacheEntry {
                doc_id: created.id,
                start: now,
            },
        );
        Ok(())
    }

    /// Persist the completion of an asynchronous unit of work.
    pub(crate) async fn log_response(
        &self,
        response: &ActivityResponse,
        meta: &LogMeta,
    ) -> Result<(), EngineError> {
        if response.job_id.is_empty() {
            return Err(EngineError::MissingField("jobId"));
        }
        if is_store_origin(meta) {
            tracing::debug!(job_id = %response.job_id, "skipping store-origin activity response");
            return Ok(());
        }

        let now = Utc::now();
        if let Some(entry) = self.cache.take(&response.job_id) {
            return self
                .complete(&entry.doc_id, Some(entry.start), response, now)
                .await;
        }

        match self.find_request(&response.job_id).await? {
            Some(doc) => {
                let start = doc
                    .body
                    .get("startMs")
                    .and_then(Value::as_i64)
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .unwrap_or(doc.created_at);
                self.complete(&doc.id, Some(start), response, now).await
            }
            None => self.handle_unbound(response, meta, now).await,
        }
    }

    async fn find_request(&self, job_id: &str) -> Result<Option<StoredDocument>, EngineError> {
        let query = MetaQuery::new().eq("jobId", job_id);
        let mut docs = self
            .store
            .list_by_meta(&self.config.collections.activities, &query, Some(1))
            .await?;
        Ok(if docs.is_empty() {
            None
        } else {
            Some(docs.remove(0))
        })
    }

    async fn complete(
        &self,
        doc_id: &str,
        start: Option<DateTime<Utc>>,
        response: &ActivityResponse,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut patch = Map::new();
        patch.insert("endTs".to_string(), json!(now.to_rfc3339()));
        patch.insert("endMs".to_string(), json!(now.timestamp_millis()));
        if let Some(start) = start {
            let duration = (now.timestamp_millis() - start.timestamp_millis()).max(0);
            patch.insert("durationMs".to_string(), json!(duration));
        }
        patch.insert(
            "status".to_string(),
            serde_json::to_value(response.terminal_status())
                .unwrap_or_else(|_| json!("unknown")),
        );
        patch.insert(
            "responseStatus".to_string(),
            json!(response.effective_status()),
        );
        if let Some(body) = &response.response {
            patch.insert("response".to_string(), body.clone());
        }
        if let Some(cost) = &response.cost {
            patch.insert("cost".to_string(), cost.clone());
        }
        if let Some(error) = &response.error {
            patch.insert("error".to_string(), serde_json::to_value(error)?);
        }

        self.store
            .enrich(
                &self.config.collections.activities,
                doc_id,
                Value::Object(patch),
                Attribution::new(
                    ACTIVITY_FUNCTION_ID,
                    &self.config.service,
                    "activity-response",
                ),
            )
            .await?;
        Ok(())
    }

    /// No matching request in cache or store: apply the configured policy.
    async fn handle_unbound(
        &self,
        response: &ActivityResponse,
        meta: &LogMeta,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let handling = self.config.unbound_response_handling;
        tracing::warn!(
            job_id = %response.job_id,
            handling = ?handling,
            "activity response without a matching request"
        );

        let as_activity = matches!(
            handling,
            UnboundResponseHandling::Activities | UnboundResponseHandling::Both
        );
        let as_error = matches!(
            handling,
            UnboundResponseHandling::Errors | UnboundResponseHandling::Both
        );

        if as_activity {
            let mut record = Map::new();
            record.insert("type".to_string(), json!("activity"));
            record.insert("jobId".to_string(), json!(response.job_id));
            record.insert(
                "status".to_string(),
                serde_json::to_value(ActivityStatus::Unbound).unwrap_or_else(|_| json!("unbound")),
            );
            record.insert(
                "responseStatus".to_string(),
                json!(response.effective_status()),
            );
            record.insert("missingStart".to_string(), json!(true));
            record.insert("endTs".to_string(), json!(now.to_rfc3339()));
            record.insert("endMs".to_string(), json!(now.timestamp_millis()));
            if let Some(body) = &response.response {
                record.insert("response".to_string(), body.clone());
            }
            if let Some(cost) = &response.cost {
                record.insert("cost".to_string(), cost.clone());
            }
            if let Some(error) = &response.error {
                record.insert("error".to_string(), serde_json::to_value(error)?);
            }
            record.extend(common_meta(&self.config, meta));

            self.store
                .create(
                    &self.config.collections.activities,
                    Value::Object(record),
                    &self.config.service,
                    "activity-response:unbound",
                )
                .await?;
        }

        if as_error {
            let mut record = Map::new();
            record.insert("type".to_string(), json!("activity-error"));
            record.insert("reason".to_string(), json!("unbound-response"));
            record.insert("jobId".to_string(), json!(response.job_id));
            record.insert(
                "responseStatus".to_string(),
                json!(response.effective_status()),
            );
            record.insert("receivedAt".to_string(), json!(now.to_rfc3339()));
            if let Some(error) = &response.error {
                record.insert("error".to_string(), serde_json::to_value(error)?);
            }
            record.extend(common_meta(&self.config, meta));

            self.store
                .create(
                    &self.config.collections.errors,
                    Value::Object(record),
                    &self.config.service,
                    "activity-response:unbound",
                )
                .await?;
        }

        if matches!(handling, UnboundResponseHandling::Drop) {
            tracing::debug!(job_id = %response.job_id, "dropping unbound activity response");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> CacheEntry {
        CacheEntry {
            doc_id: id.to_string(),
            start: Utc::now(),
        }
    }

    #[test]
    fn cache_take_is_single_use() {
        let cache = JobCache::new(4);
        cache.insert("job-1".to_string(), entry("d1"));
        assert_eq!(cache.take("job-1").map(|e| e.doc_id), Some("d1".to_string()));
        assert!(cache.take("job-1").is_none());
    }

    #[test]
    fn cache_evicts_oldest_at_capacity() {
        let cache = JobCache::new(2);
        cache.insert("a".to_string(), entry("d1"));
        cache.insert("b".to_string(), entry("d2"));
        cache.insert("c".to_string(), entry("d3"));
        assert_eq!(cache.len(), 2);
        assert!(cache.take("a").is_none());
        assert!(cache.take("b").is_some());
        assert!(cache.take("c").is_some());
    }

    #[test]
    fn cache_reinsert_after_take_counts_as_newest() {
        let cache = JobCache::new(2);
        cache.insert("a".to_string(), entry("d1"));
        cache.insert("b".to_string(), entry("d2"));
        assert!(cache.take("a").is_some());
        cache.insert("a".to_string(), entry("d3"));
        // "b" is now the oldest live entry and must be the one evicted.
        cache.insert("c".to_string(), entry("d4"));
        assert!(cache.take("b").is_none());
        assert_eq!(cache.take("a").map(|e| e.doc_id), Some("d3".to_string()));
        assert!(cache.take("c").is_some());
    }

    #[test]
    fn cache_reinsert_replaces_without_growing() {
        let cache = JobCache::new(2);
        cache.insert("a".to_string(), entry("d1"));
        cache.insert("a".to_string(), entry("d2"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take("a").map(|e| e.doc_id), Some("d2".to_string()));
    }
}
