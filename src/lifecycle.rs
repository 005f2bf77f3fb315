//! Entity lifecycle management
//!
//! Materializes local mirror records for remote entities with
//! exactly-once creation under concurrent callers, allocates scope-unique
//! names, and applies the soft-vs-hard delete policy.

use crate::audit::{actions, AuditSink};
use crate::error::{StratusError, StratusResult};
use crate::lockman::LockRegistry;
use crate::model::{CacheAssociation, MirroredResource, STATUS_READY};
use crate::provider::RemoteEntity;
use crate::store::{Criteria, FieldDiff, Record, Repository};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Writes terminal task outcomes into a target's status channel
///
/// Object-safe so the task orchestrator can report failures without
/// depending on the repository generics. Task workers must not touch any
/// other resource field.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Set a target's status and reason
    async fn set_status(&self, target_id: &str, status: &str, reason: &str) -> StratusResult<()>;
}

/// Manages mirror record creation, update-in-place and deletion
pub struct LifecycleManager<R> {
    repo: R,
    locks: Arc<LockRegistry>,
    audit: Arc<dyn AuditSink>,
    max_name_attempts: u32,
}

impl<R: Repository<MirroredResource>> LifecycleManager<R> {
    /// Create a lifecycle manager over a resource repository
    pub fn new(repo: R, locks: Arc<LockRegistry>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            repo,
            locks,
            audit,
            max_name_attempts: 100,
        }
    }

    /// Override the name allocation attempt cap
    pub fn with_max_name_attempts(mut self, attempts: u32) -> Self {
        self.max_name_attempts = attempts;
        self
    }

    /// The underlying repository
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Fetch the local mirror for a remote entity, creating it when absent
    ///
    /// Serialized by the class lock: of N concurrent calls for the same
    /// (external id, manager scope), exactly one creates and the rest
    /// observe the created record with `created == false`. Unless
    /// `suppress_update` is set, an existing record is updated in place
    /// under its object lock before being returned.
    pub async fn fetch_or_create(
        &self,
        remote: &RemoteEntity,
        manager_id: &str,
        suppress_update: bool,
        actor: &str,
    ) -> StratusResult<(MirroredResource, bool)> {
        if remote.global_id.is_empty() {
            return Err(StratusError::Validation(
                "remote entity has no global id".to_string(),
            ));
        }

        let _class = self.locks.acquire_class(MirroredResource::KIND).await?;

        let existing = self.find_mirror(&remote.global_id, manager_id).await?;
        if let Some(record) = existing {
            debug!(
                external_id = %remote.global_id,
                manager_id,
                id = %record.id(),
                "mirror already present"
            );
            if suppress_update {
                return Ok((record, false));
            }
            let (updated, _) = self.sync_update(&record, remote, actor).await?;
            return Ok((updated, false));
        }

        let record = self.create_mirror(remote, manager_id, actor).await?;
        Ok((record, true))
    }

    /// Update an existing mirror from its remote counterpart
    ///
    /// Takes the object lock, applies the remote fields, and logs the
    /// field-by-field diff when anything changed. Returns the refreshed
    /// record with the diff so callers can tell a real update from a
    /// no-op pass.
    pub async fn sync_update(
        &self,
        record: &MirroredResource,
        remote: &RemoteEntity,
        actor: &str,
    ) -> StratusResult<(MirroredResource, FieldDiff)> {
        let id = record.record_id();
        let _object = self.locks.acquire_object(&id).await?;

        let name = remote.name.clone();
        let status = remote.status.clone();
        let shared = remote.shared;
        let diff = self
            .repo
            .update(
                &id,
                Box::new(move |r: &mut MirroredResource| {
                    r.base.name = name;
                    if !status.is_empty() {
                        r.state.status = status;
                    }
                    r.shared = shared;
                    r.base.touch();
                }),
            )
            .await?;

        if !diff.is_empty() {
            info!(id = %id, %diff, "synced mirror with remote");
            self.audit
                .record(
                    &format!("{}/{}", MirroredResource::KIND, id),
                    actions::SYNC_UPDATE,
                    diff.to_json(),
                    actor,
                )
                .await;
        }

        let refreshed = self
            .repo
            .get(&id)
            .await?
            .ok_or_else(|| StratusError::not_found(MirroredResource::KIND, id))?;
        Ok((refreshed, diff))
    }

    /// Delete a mirror record
    ///
    /// Refuses with `NotEmpty` while dependent cache associations remain.
    /// Records tied to a still-active manager scope are hard-removed so a
    /// re-discovered external id cannot collide with a soft-deleted row;
    /// unmanaged records are soft-marked.
    pub async fn delete(
        &self,
        id: &str,
        associations: &dyn Repository<CacheAssociation>,
        actor: &str,
    ) -> StratusResult<()> {
        let record = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| StratusError::not_found(MirroredResource::KIND, id))?;

        let dependents = associations
            .count(&Criteria::eq("cache_id", id.to_string()))
            .await?;
        if dependents > 0 {
            return Err(StratusError::NotEmpty {
                kind: MirroredResource::KIND,
                id: id.to_string(),
                dependents,
            });
        }

        let _object = self.locks.acquire_object(id).await?;

        let entity = format!("{}/{}", MirroredResource::KIND, id);
        if !record.manager_id().is_empty() {
            self.repo.remove(id).await?;
            info!(id, "hard-removed mirror record");
            self.audit
                .record(
                    &entity,
                    actions::DELETE,
                    serde_json::json!({"external_id": record.external_id()}),
                    actor,
                )
                .await;
        } else {
            self.repo
                .update(id, Box::new(|r: &mut MirroredResource| r.mark_deleted()))
                .await?;
            info!(id, "soft-deleted mirror record");
            self.audit
                .record(
                    &entity,
                    actions::SOFT_DELETE,
                    serde_json::json!({"external_id": record.external_id()}),
                    actor,
                )
                .await;
        }
        Ok(())
    }

    async fn find_mirror(
        &self,
        external_id: &str,
        manager_id: &str,
    ) -> StratusResult<Option<MirroredResource>> {
        let mut matches = self
            .repo
            .find(&Criteria::And(vec![
                Criteria::eq("external_id", external_id),
                Criteria::eq("manager_id", manager_id),
                Criteria::NotDeleted,
            ]))
            .await?;
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.remove(0))
        })
    }

    async fn create_mirror(
        &self,
        remote: &RemoteEntity,
        manager_id: &str,
        actor: &str,
    ) -> StratusResult<MirroredResource> {
        // The raw name lock serializes allocation across concurrent
        // creations of different external ids.
        let _name_lock = self
            .locks
            .acquire_raw(MirroredResource::KIND, "name")
            .await?;

        let name = self.generate_name(&remote.name, manager_id).await?;

        let mut record = MirroredResource::new(name, &remote.global_id, manager_id);
        record.shared = remote.shared;
        if !remote.status.is_empty() {
            record.state.status = remote.status.clone();
        } else {
            record.state.status = STATUS_READY.to_string();
        }

        self.repo.insert(record.clone()).await?;

        info!(
            id = %record.id(),
            name = %record.name(),
            external_id = %remote.global_id,
            manager_id,
            "created mirror record"
        );
        self.audit
            .record(
                &format!("{}/{}", MirroredResource::KIND, record.id()),
                actions::CREATE,
                serde_json::json!({
                    "name": record.name(),
                    "external_id": remote.global_id,
                    "manager_id": manager_id,
                }),
                actor,
            )
            .await;

        Ok(record)
    }

    /// Allocate a name unique among non-deleted records of the scope,
    /// suffixing `-1`, `-2`, ... on collision
    async fn generate_name(&self, base: &str, manager_id: &str) -> StratusResult<String> {
        let base = if base.is_empty() { "resource" } else { base };
        for attempt in 0..self.max_name_attempts {
            let candidate = if attempt == 0 {
                base.to_string()
            } else {
                format!("{base}-{attempt}")
            };
            let taken = self
                .repo
                .count(&Criteria::And(vec![
                    Criteria::eq("name", candidate.clone()),
                    Criteria::eq("manager_id", manager_id),
                    Criteria::NotDeleted,
                ]))
                .await?;
            if taken == 0 {
                return Ok(candidate);
            }
        }
        Err(StratusError::Conflict(format!(
            "no free name for {base:?} in scope {manager_id} after {} attempts",
            self.max_name_attempts
        )))
    }
}

#[async_trait]
impl<R: Repository<MirroredResource>> StatusWriter for LifecycleManager<R> {
    async fn set_status(&self, target_id: &str, status: &str, reason: &str) -> StratusResult<()> {
        let _object = self.locks.acquire_object(target_id).await?;
        let status = status.to_string();
        let reason = reason.to_string();
        self.repo
            .update(
                target_id,
                Box::new(move |r: &mut MirroredResource| r.set_status(&status, &reason)),
            )
            .await?;
        Ok(())
    }
}
