//! Capacity-bounded cache management
//!
//! Tracks which payloads are cached on which cache container through
//! [`CacheAssociation`] join records. Admission is capacity-checked
//! against the host's predicate; a full cache evicts its least-used
//! active payload before admitting a new one. Cache and uncache work
//! runs as tasks, never inline.

use crate::audit::{actions, AuditSink};
use crate::error::{StratusError, StratusResult};
use crate::lockman::LockRegistry;
use crate::model::{AssociationStatus, CacheAssociation};
use crate::provider::{CapacityPredicate, RemoteEntity};
use crate::reconcile::{compare_sets, SyncResult};
use crate::store::{Criteria, Record, Repository};
use crate::taskman::{TaskHandle, TaskOrchestrator};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Task kind that transfers a payload onto a cache container
pub const TASK_KIND_CACHE_PAYLOAD: &str = "payload-cache";

/// Task kind that removes a payload from a cache container
pub const TASK_KIND_UNCACHE_PAYLOAD: &str = "payload-uncache";

/// Manages cache associations for all cache containers
pub struct CacheManager<A> {
    repo: A,
    locks: Arc<LockRegistry>,
    tasks: TaskOrchestrator,
    audit: Arc<dyn AuditSink>,
}

impl<A: Repository<CacheAssociation>> CacheManager<A> {
    /// Create a cache manager over an association repository
    pub fn new(
        repo: A,
        locks: Arc<LockRegistry>,
        tasks: TaskOrchestrator,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            repo,
            locks,
            tasks,
            audit,
        }
    }

    /// The underlying association repository
    pub fn repo(&self) -> &A {
        &self.repo
    }

    /// Request that a payload be cached on a cache container
    ///
    /// Idempotent for payloads already cached or in flight: returns no
    /// handles and dispatches nothing. At capacity, the least-used active
    /// payload is evicted first; with no evictable payload the request
    /// fails with `CapacityExceeded`. Returns the handles of the tasks
    /// dispatched (eviction first, then the cache task).
    pub async fn request_cache(
        &self,
        cache_id: &str,
        payload_id: &str,
        predicate: &dyn CapacityPredicate,
        actor: &str,
    ) -> StratusResult<Vec<TaskHandle>> {
        if cache_id.is_empty() || payload_id.is_empty() {
            return Err(StratusError::Validation(
                "cache and payload ids must be non-empty".to_string(),
            ));
        }

        let _cache = self
            .locks
            .acquire_raw(CacheAssociation::KIND, cache_id)
            .await?;

        let id = CacheAssociation::id_for(cache_id, payload_id);
        if let Some(existing) = self.repo.get(&id).await? {
            return match existing.status {
                AssociationStatus::Init | AssociationStatus::Active => {
                    debug!(cache_id, payload_id, status = %existing.status,
                        "payload already cached or in flight");
                    Ok(Vec::new())
                }
                AssociationStatus::Deleting => Err(StratusError::Conflict(format!(
                    "payload {payload_id} is being removed from cache {cache_id}"
                ))),
            };
        }

        let mut handles = Vec::new();

        let active = self.active_associations(cache_id).await?;
        if predicate.is_at_limit(cache_id, &active) {
            let victim = pick_victim(&active, payload_id)
                .cloned()
                .ok_or_else(|| StratusError::CapacityExceeded {
                    cache_id: cache_id.to_string(),
                    payload_id: payload_id.to_string(),
                })?;
            handles.push(self.evict(&victim, actor).await?);
        }

        let assoc = CacheAssociation::new(cache_id, payload_id);
        self.repo.insert(assoc).await?;

        let handle = self.dispatch(TASK_KIND_CACHE_PAYLOAD, cache_id, payload_id)?;
        handles.push(handle);

        info!(cache_id, payload_id, "requested payload caching");
        self.audit
            .record(
                &format!("{}/{}", CacheAssociation::KIND, id),
                actions::CACHE_REQUEST,
                serde_json::json!({"cache_id": cache_id, "payload_id": payload_id}),
                actor,
            )
            .await;

        Ok(handles)
    }

    /// Release a payload from a cache container
    ///
    /// A pending (`INIT`) association is detached inline when `force` is
    /// set; otherwise the association advances to `DELETING` and an
    /// uncache task is dispatched. Releasing an already-deleting
    /// association is a no-op.
    pub async fn release_cache(
        &self,
        cache_id: &str,
        payload_id: &str,
        force: bool,
        actor: &str,
    ) -> StratusResult<Option<TaskHandle>> {
        let _cache = self
            .locks
            .acquire_raw(CacheAssociation::KIND, cache_id)
            .await?;

        let id = CacheAssociation::id_for(cache_id, payload_id);
        let assoc = self
            .repo
            .get(&id)
            .await?
            .ok_or_else(|| StratusError::not_found(CacheAssociation::KIND, &id))?;

        match assoc.status {
            AssociationStatus::Deleting => {
                debug!(cache_id, payload_id, "release already underway");
                return Ok(None);
            }
            AssociationStatus::Init if force => {
                // Never transferred; nothing to tear down remotely.
                self.repo.remove(&id).await?;
                info!(cache_id, payload_id, "detached pending association");
                self.audit
                    .record(
                        &format!("{}/{}", CacheAssociation::KIND, id),
                        actions::CACHE_RELEASE,
                        serde_json::json!({"cache_id": cache_id, "payload_id": payload_id, "forced": true}),
                        actor,
                    )
                    .await;
                return Ok(None);
            }
            _ => {}
        }

        self.repo
            .update(
                &id,
                Box::new(|a: &mut CacheAssociation| {
                    a.advance(AssociationStatus::Deleting);
                }),
            )
            .await?;

        let handle = self.dispatch(TASK_KIND_UNCACHE_PAYLOAD, cache_id, payload_id)?;
        info!(cache_id, payload_id, "dispatched uncache task");
        self.audit
            .record(
                &format!("{}/{}", CacheAssociation::KIND, id),
                actions::CACHE_RELEASE,
                serde_json::json!({"cache_id": cache_id, "payload_id": payload_id, "forced": force}),
                actor,
            )
            .await;

        Ok(Some(handle))
    }

    /// Whether caching `candidate` would exceed the cache's capacity
    ///
    /// An already-cached candidate never counts against the limit.
    pub async fn is_at_capacity(
        &self,
        cache_id: &str,
        candidate: &str,
        predicate: &dyn CapacityPredicate,
    ) -> StratusResult<bool> {
        let active = self.active_associations(cache_id).await?;
        if active.iter().any(|a| a.payload_id == candidate) {
            return Ok(false);
        }
        Ok(predicate.is_at_limit(cache_id, &active))
    }

    /// Pick the payload a full cache should give up
    ///
    /// The least-used active association excluding `protected`; ties
    /// break on stable store order. `None` when nothing is evictable.
    pub async fn select_eviction_victim(
        &self,
        cache_id: &str,
        protected: &str,
    ) -> StratusResult<Option<CacheAssociation>> {
        let active = self.active_associations(cache_id).await?;
        Ok(pick_victim(&active, protected).cloned())
    }

    /// Register a consumer of a cached payload
    ///
    /// Returns the new consumer count. Fails with `Conflict` while the
    /// association is being removed.
    pub async fn acquire_consumer(
        &self,
        cache_id: &str,
        payload_id: &str,
    ) -> StratusResult<u32> {
        let id = CacheAssociation::id_for(cache_id, payload_id);
        let assoc = self
            .repo
            .get(&id)
            .await?
            .ok_or_else(|| StratusError::not_found(CacheAssociation::KIND, &id))?;
        if assoc.status == AssociationStatus::Deleting {
            return Err(StratusError::Conflict(format!(
                "payload {payload_id} is being removed from cache {cache_id}"
            )));
        }

        self.repo
            .update(
                &id,
                Box::new(|a: &mut CacheAssociation| {
                    a.ref_count += 1;
                    a.updated_at = chrono::Utc::now();
                }),
            )
            .await?;
        self.consumer_count(&id).await
    }

    /// Drop a consumer of a cached payload
    ///
    /// Returns the new consumer count; never goes below zero.
    pub async fn release_consumer(
        &self,
        cache_id: &str,
        payload_id: &str,
    ) -> StratusResult<u32> {
        let id = CacheAssociation::id_for(cache_id, payload_id);
        self.repo
            .update(
                &id,
                Box::new(|a: &mut CacheAssociation| {
                    a.ref_count = a.ref_count.saturating_sub(1);
                    a.updated_at = chrono::Utc::now();
                }),
            )
            .await?;
        self.consumer_count(&id).await
    }

    /// Reconcile one cache container's associations with the payload set
    /// actually present on it
    ///
    /// Unlike resource reconciliation, stale associations are detached
    /// inline (the payload is already gone; there is nothing to tear
    /// down) and discovered payloads are recorded directly as `ACTIVE`.
    pub async fn sync_cached_payloads(
        &self,
        cache_id: &str,
        remote: Vec<RemoteEntity>,
        create_only: bool,
        actor: &str,
    ) -> SyncResult {
        let mut result = SyncResult::new();

        // Object lock keeps the cache container's other mutations out of
        // the pass; the raw lock serializes against request/release.
        let _object = match self.locks.acquire_object(cache_id).await {
            Ok(guard) => guard,
            Err(err) => {
                result.fetch_error(&err);
                return result;
            }
        };
        let _cache = match self
            .locks
            .acquire_raw(CacheAssociation::KIND, cache_id)
            .await
        {
            Ok(guard) => guard,
            Err(err) => {
                result.fetch_error(&err);
                return result;
            }
        };

        let local = match self
            .repo
            .find(&Criteria::eq("cache_id", cache_id))
            .await
        {
            Ok(records) => records,
            Err(err) => {
                result.fetch_error(&err);
                return result;
            }
        };

        let sets = compare_sets(local, remote);
        debug!(
            cache_id,
            removed = sets.removed.len(),
            common = sets.common.len(),
            added = sets.added.len(),
            "matched associations against cached payload inventory"
        );

        for assoc in sets.removed {
            let id = assoc.record_id();
            match self.repo.remove(&id).await {
                Ok(()) => {
                    info!(cache_id, payload_id = %assoc.payload_id,
                        "detached association for vanished payload");
                    self.audit
                        .record(
                            &format!("{}/{}", CacheAssociation::KIND, id),
                            actions::CACHE_RELEASE,
                            serde_json::json!({
                                "cache_id": cache_id,
                                "payload_id": assoc.payload_id,
                                "reason": "missing on cache",
                            }),
                            actor,
                        )
                        .await;
                    result.delete();
                }
                Err(err) => {
                    warn!(cache_id, payload_id = %assoc.payload_id, %err,
                        "failed to detach stale association");
                    result.delete_error(&err);
                }
            }
        }

        for (assoc, _entity) in sets.common {
            if create_only {
                continue;
            }
            let id = assoc.record_id();
            match self
                .repo
                .update(
                    &id,
                    Box::new(|a: &mut CacheAssociation| {
                        // A payload visible on the cache is active no
                        // matter what the join record still says.
                        a.advance(AssociationStatus::Active);
                    }),
                )
                .await
            {
                Ok(diff) if !diff.is_empty() => {
                    self.audit
                        .record(
                            &format!("{}/{}", CacheAssociation::KIND, id),
                            actions::SYNC_UPDATE,
                            diff.to_json(),
                            actor,
                        )
                        .await;
                    result.update();
                }
                Ok(_) => {}
                Err(err) => result.update_error(&err),
            }
        }

        for entity in sets.added {
            let mut assoc = CacheAssociation::new(cache_id, entity.global_id.clone());
            assoc.advance(AssociationStatus::Active);
            let id = assoc.record_id();
            match self.repo.insert(assoc).await {
                Ok(()) => {
                    self.audit
                        .record(
                            &format!("{}/{}", CacheAssociation::KIND, id),
                            actions::CREATE,
                            serde_json::json!({
                                "cache_id": cache_id,
                                "payload_id": entity.global_id,
                                "status": "active",
                            }),
                            actor,
                        )
                        .await;
                    result.add();
                }
                Err(err) => {
                    warn!(cache_id, payload_id = %entity.global_id, %err,
                        "failed to record discovered payload");
                    result.add_error(&err);
                }
            }
        }

        info!(cache_id, %result, "cached payload reconciliation finished");
        result
    }

    async fn active_associations(&self, cache_id: &str) -> StratusResult<Vec<CacheAssociation>> {
        self.repo
            .find(&Criteria::And(vec![
                Criteria::eq("cache_id", cache_id),
                Criteria::eq("status", AssociationStatus::Active.to_string()),
            ]))
            .await
    }

    async fn evict(&self, victim: &CacheAssociation, actor: &str) -> StratusResult<TaskHandle> {
        let id = victim.record_id();
        self.repo
            .update(
                &id,
                Box::new(|a: &mut CacheAssociation| {
                    a.advance(AssociationStatus::Deleting);
                }),
            )
            .await?;

        let handle = self.dispatch(TASK_KIND_UNCACHE_PAYLOAD, &victim.cache_id, &victim.payload_id)?;
        info!(
            cache_id = %victim.cache_id,
            payload_id = %victim.payload_id,
            ref_count = victim.ref_count,
            "evicting least-used payload"
        );
        self.audit
            .record(
                &format!("{}/{}", CacheAssociation::KIND, id),
                actions::CACHE_EVICT,
                serde_json::json!({
                    "cache_id": victim.cache_id,
                    "payload_id": victim.payload_id,
                    "ref_count": victim.ref_count,
                }),
                actor,
            )
            .await;
        Ok(handle)
    }

    fn dispatch(&self, kind: &str, cache_id: &str, payload_id: &str) -> StratusResult<TaskHandle> {
        let id = CacheAssociation::id_for(cache_id, payload_id);
        let handle = self.tasks.new_task(
            kind,
            &id,
            serde_json::json!({"cache_id": cache_id, "payload_id": payload_id}),
            None,
        )?;
        self.tasks.schedule_run(handle)?;
        Ok(handle)
    }

    async fn consumer_count(&self, id: &str) -> StratusResult<u32> {
        Ok(self
            .repo
            .get(id)
            .await?
            .map(|a| a.ref_count)
            .unwrap_or(0))
    }
}

/// Least-used active association, excluding the protected payload; ties
/// break on scan order
fn pick_victim<'a>(
    active: &'a [CacheAssociation],
    protected: &str,
) -> Option<&'a CacheAssociation> {
    let mut victim: Option<&CacheAssociation> = None;
    for assoc in active {
        if assoc.payload_id == protected {
            continue;
        }
        match victim {
            Some(v) if assoc.ref_count >= v.ref_count => {}
            _ => victim = Some(assoc),
        }
    }
    victim
}
