//! Entity-keyed running aggregates, updated via read-modify-write.
//!
//! One durable document per (kind, entity value, tenant) accumulates event
//! counts, first/last-seen timestamps, and bounded deduplicated sets.
//! There is no compare-and-swap at the store boundary: two concurrent
//! events for the same key can lose an update. Callers tolerate this at
//! low contention; the trade-off is documented rather than fixed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use magpie_core::{AuditEvent, Config};
use magpie_rules::lookup_path;
use magpie_store::{Attribution, DocumentStore, MetaQuery};

use crate::error::EngineError;
use crate::record::{merge_set, report_error, ErrorHook};

/// The five aggregate kinds tracked per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    User,
    Ip,
    Machine,
    Domain,
    ActivityType,
}

impl AggregateKind {
    fn doc_type(self) -> &'static str {
        match self {
            AggregateKind::User => "user-aggregate",
            AggregateKind::Ip => "ip-aggregate",
            AggregateKind::Machine => "machine-aggregate",
            AggregateKind::Domain => "domain-aggregate",
            AggregateKind::ActivityType => "activity-type-aggregate",
        }
    }

    fn function_id(self) -> &'static str {
        match self {
            AggregateKind::User => "magpie@user-aggregate",
            AggregateKind::Ip => "magpie@ip-aggregate",
            AggregateKind::Machine => "magpie@machine-aggregate",
            AggregateKind::Domain => "magpie@domain-aggregate",
            AggregateKind::ActivityType => "magpie@activity-type-aggregate",
        }
    }

    fn reason(self, verb: &str) -> String {
        let noun = match self {
            AggregateKind::User => "user",
            AggregateKind::Ip => "ip",
            AggregateKind::Machine => "machine",
            AggregateKind::Domain => "domain",
            AggregateKind::ActivityType => "activity-type",
        };
        format!("{noun}:{verb}")
    }
}

/// One fully resolved aggregate update, ready to upsert.
struct AggregateUpdate {
    kind: AggregateKind,
    collection: String,
    key: String,
    /// Fields identifying the entity, seeded on create.
    identity: Vec<(&'static str, Value)>,
    /// Dotted counter path, e.g. `counts.byAction.login`.
    counter_path: String,
    /// Set field → members contributed by this event.
    sets: Vec<(&'static str, Vec<String>)>,
}

pub(crate) struct AggregateUpdater {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    on_error: Option<ErrorHook>,
}

impl AggregateUpdater {
    pub(crate) fn new(
        config: Arc<Config>,
        store: Arc<dyn DocumentStore>,
        on_error: Option<ErrorHook>,
    ) -> Self {
        Self {
            config,
            store,
            on_error,
        }
    }

    /// Update every aggregate resolvable from the event.
    ///
    /// Failures are swallowed per kind so one aggregate never blocks its
    /// siblings or the primary audit write.
    pub(crate) async fn update_all(&self, event: &AuditEvent, record: &Value) {
        let tenant = record
            .get("tenantId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        for update in self.resolve(event, &tenant) {
            let kind = update.kind;
            if let Err(err) = self.upsert(update).await {
                tracing::warn!(?kind, error = %err, "entity aggregate update failed");
                report_error(&self.on_error, &err, record);
            }
        }
    }

    /// Resolve the aggregate updates this event contributes to.
    fn resolve(&self, event: &AuditEvent, tenant: &str) -> Vec<AggregateUpdate> {
        let cols = &self.config.collections;
        let action = event.action.as_deref().unwrap_or("unknown");
        let user_ref = format!("{}:{}", event.app_id, event.user_id);
        let data = event.data.as_ref();
        let data_str = |field: &str| -> Option<String> {
            data.and_then(|d| d.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let ip = data_str("ip");
        let machine = data_str("machine");
        let domain = data_str("domain");

        let mut updates = Vec::with_capacity(5);

        // User aggregate: always resolvable (appId/userId are mandatory).
        updates.push(AggregateUpdate {
            kind: AggregateKind::User,
            collection: cols.users.clone(),
            key: format!("{}:{}:{}", event.app_id, event.user_id, tenant),
            identity: vec![
                ("appId", event.app_id.clone().into()),
                ("userId", event.user_id.clone().into()),
            ],
            counter_path: format!("counts.byAction.{action}"),
            sets: vec![
                ("tags", event.tags.clone()),
                ("context", event.context.clone()),
                ("ips", ip.clone().into_iter().collect()),
                ("machines", machine.clone().into_iter().collect()),
            ],
        });

        let shared_sets = |user_ref: &str, app_id: &str| {
            vec![
                ("users", vec![user_ref.to_string()]),
                ("apps", vec![app_id.to_string()]),
            ]
        };

        if let Some(ip) = ip {
            updates.push(AggregateUpdate {
                kind: AggregateKind::Ip,
                collection: cols.ips.clone(),
                key: format!("{ip}:{tenant}"),
                identity: vec![("ip", ip.into())],
                counter_path: format!("counts.byAction.{action}"),
                sets: shared_sets(&user_ref, &event.app_id),
            });
        }
        if let Some(machine) = machine {
            updates.push(AggregateUpdate {
                kind: AggregateKind::Machine,
                collection: cols.machines.clone(),
                key: format!("{machine}:{tenant}"),
                identity: vec![("machine", machine.into())],
                counter_path: format!("counts.byAction.{action}"),
                sets: shared_sets(&user_ref, &event.app_id),
            });
        }
        if let Some(domain) = domain {
            updates.push(AggregateUpdate {
                kind: AggregateKind::Domain,
                collection: cols.domains.clone(),
                key: format!("{domain}:{tenant}"),
                identity: vec![("domain", domain.into())],
                counter_path: format!("counts.byAction.{action}"),
                sets: shared_sets(&user_ref, &event.app_id),
            });
        }
        if let Some(activity_type) = event.action.clone() {
            updates.push(AggregateUpdate {
                kind: AggregateKind::ActivityType,
                collection: cols.activity_types.clone(),
                key: format!("{activity_type}:{tenant}"),
                identity: vec![("activityType", activity_type.into())],
                counter_path: format!("counts.byApp.{}", event.app_id),
                sets: shared_sets(&user_ref, &event.app_id),
            });
        }

        updates
    }

    /// Read-modify-write of one aggregate document.
    async fn upsert(&self, update: AggregateUpdate) -> Result<(), EngineError> {
        let now = Utc::now();
        let existing = self
            .store
            .list_by_meta(
                &update.collection,
                &MetaQuery::new().eq("key", update.key.clone()),
                Some(1),
            )
            .await?;

        match existing.first() {
            Some(doc) => {
                let patch = self.build_patch(&update, &doc.body, now);
                self.store
                    .enrich(
                        &update.collection,
                        &doc.id,
                        Value::Object(patch),
                        Attribution::new(
                            update.kind.function_id(),
                            &self.config.service,
                            update.kind.reason("update"),
                        ),
                    )
                    .await?;
            }
            None => {
                let seed = self.build_seed(&update, now);
                self.store
                    .create(
                        &update.collection,
                        seed,
                        &self.config.service,
                        &update.kind.reason("create"),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    fn build_patch(
        &self,
        update: &AggregateUpdate,
        body: &Value,
        now: DateTime<Utc>,
    ) -> Map<String, Value> {
        let total = body.get("totalEvents").and_then(Value::as_u64).unwrap_or(0);
        let counter = lookup_path(body, &update.counter_path)
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let mut patch = Map::new();
        patch.insert("totalEvents".to_string(), (total + 1).into());
        patch.insert("lastSeen".to_string(), now.to_rfc3339().into());
        patch.insert(update.counter_path.clone(), (counter + 1).into());

        for (field, additions) in &update.sets {
            if additions.is_empty() {
                continue;
            }
            let existing = body.get(*field).and_then(Value::as_array);
            let merged = merge_set(
                existing.map(Vec::as_slice).unwrap_or(&[]),
                additions,
                self.config.max_set_size,
            );
            patch.insert((*field).to_string(), Value::Array(merged));
        }

        patch
    }

    fn build_seed(&self, update: &AggregateUpdate, now: DateTime<Utc>) -> Value {
        let mut obj = Map::new();

        // counts.byAction.login → {"counts": {"byAction": {"login": 1}}}
        let segments: Vec<&str> = update.counter_path.split('.').collect();
        let mut counter = json!(1);
        for segment in segments.iter().skip(1).rev() {
            counter = json!({ *segment: counter });
        }
        let root = segments.first().copied().unwrap_or("counts");
        obj.insert(root.to_string(), counter);

        obj.insert("type".to_string(), update.kind.doc_type().into());
        obj.insert("key".to_string(), update.key.clone().into());
        for (field, value) in &update.identity {
            obj.insert((*field).to_string(), value.clone());
        }
        let tenant = update.key.rsplit(':').next().unwrap_or_default();
        if !tenant.is_empty() {
            obj.insert("tenantId".to_string(), tenant.into());
        }
        obj.insert("totalEvents".to_string(), 1.into());
        obj.insert("firstSeen".to_string(), now.to_rfc3339().into());
        obj.insert("lastSeen".to_string(), now.to_rfc3339().into());
        for (field, members) in &update.sets {
            let merged = merge_set(&[], members, self.config.max_set_size);
            obj.insert((*field).to_string(), Value::Array(merged));
        }
        obj.insert("service".to_string(), self.config.service.clone().into());
        obj.insert("env".to_string(), self.config.env_name.clone().into());

        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_store::MemoryStore;

    fn updater() -> AggregateUpdater {
        AggregateUpdater::new(
            Arc::new(Config::default()),
            Arc::new(MemoryStore::default()),
            None,
        )
    }

    fn event_with_data() -> AuditEvent {
        let mut event = AuditEvent::new("portal", "alice");
        event.action = Some("login".to_string());
        event.tags = vec!["mfa".to_string()];
        event.data = Some(json!({ "ip": "10.0.0.1", "machine": "ws-7" }));
        event
    }

    #[test]
    fn resolve_emits_one_update_per_present_entity() {
        let updates = updater().resolve(&event_with_data(), "t1");
        let kinds: Vec<AggregateKind> = updates.iter().map(|u| u.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AggregateKind::User,
                AggregateKind::Ip,
                AggregateKind::Machine,
                AggregateKind::ActivityType,
            ]
        );
        assert_eq!(updates[0].key, "portal:alice:t1");
        assert_eq!(updates[1].key, "10.0.0.1:t1");
        assert_eq!(updates[3].counter_path, "counts.byApp.portal");
    }

    #[test]
    fn seed_nests_counter_path_and_stamps_identity() {
        let updater = updater();
        let updates = updater.resolve(&event_with_data(), "t1");
        let seed = updater.build_seed(&updates[0], Utc::now());
        assert_eq!(seed["type"], "user-aggregate");
        assert_eq!(seed["counts"]["byAction"]["login"], 1);
        assert_eq!(seed["totalEvents"], 1);
        assert_eq!(seed["tenantId"], "t1");
        assert_eq!(seed["appId"], "portal");
        assert_eq!(seed["tags"], json!(["mfa"]));
    }

    #[test]
    fn patch_increments_existing_counters() {
        let updater = updater();
        let updates = updater.resolve(&event_with_data(), "t1");
        let body = json!({
            "totalEvents": 4,
            "counts": { "byAction": { "login": 2 } },
            "tags": ["sso"],
        });
        let patch = updater.build_patch(&updates[0], &body, Utc::now());
        assert_eq!(patch["totalEvents"], 5);
        assert_eq!(patch["counts.byAction.login"], 3);
        assert_eq!(patch["tags"], json!(["sso", "mfa"]));
    }
}
