//! The reconciliation engine
//!
//! Drives full passes over a manager scope. Removal is asynchronous: a
//! stale record is marked `deleting` and a removal task is dispatched,
//! never deleted inline. Public-cloud scopes sync in two phases, the
//! region-shared inventory (create-only) before the scoped one.

use crate::error::StratusResult;
use crate::lifecycle::{LifecycleManager, StatusWriter};
use crate::lockman::LockRegistry;
use crate::model::{MirroredResource, STATUS_DELETING};
use crate::provider::{CloudProvider, RemoteEntity};
use crate::reconcile::compare::compare_sets;
use crate::reconcile::result::SyncResult;
use crate::store::{Criteria, Record, Repository};
use crate::taskman::TaskOrchestrator;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Task kind dispatched for each record that vanished from the remote
/// side; the host registers an implementation that performs the actual
/// teardown and final delete
pub const TASK_KIND_RESOURCE_REMOVE: &str = "resource-remove";

/// Reconciles one manager scope's mirror records with its provider
pub struct SyncEngine<R> {
    lifecycle: Arc<LifecycleManager<R>>,
    locks: Arc<LockRegistry>,
    tasks: TaskOrchestrator,
}

impl<R: Repository<MirroredResource>> SyncEngine<R> {
    /// Create an engine over a lifecycle manager and task orchestrator
    pub fn new(
        lifecycle: Arc<LifecycleManager<R>>,
        locks: Arc<LockRegistry>,
        tasks: TaskOrchestrator,
    ) -> Self {
        Self {
            lifecycle,
            locks,
            tasks,
        }
    }

    /// Run a full reconciliation pass for one manager scope
    ///
    /// With `create_only` set, existing records are left untouched and
    /// only missing ones are created. Entry-level failures are collected
    /// in the returned [`SyncResult`]; only a failure to list the remote
    /// inventory aborts the pass, and even that is reported through the
    /// result rather than an `Err`.
    pub async fn sync_manager_scope(
        &self,
        manager_id: &str,
        provider: &dyn CloudProvider,
        create_only: bool,
        actor: &str,
    ) -> SyncResult {
        let mut result = SyncResult::new();

        let remote = match provider.list_entities(manager_id).await {
            Ok(entities) => entities,
            Err(err) => {
                warn!(manager_id, provider = provider.provider_name(), %err,
                    "remote listing failed, aborting pass");
                result.fetch_error(&err);
                return result;
            }
        };

        if provider.is_public_cloud() {
            // The shared inventory belongs to the region, not this
            // credential: never touch or remove from it, only fill gaps.
            let (shared, scoped): (Vec<_>, Vec<_>) =
                remote.into_iter().partition(|e| e.shared);
            result.merge(self.sync_pass(manager_id, shared, true, true, actor).await);
            result.merge(
                self.sync_pass(manager_id, scoped, false, create_only, actor)
                    .await,
            );
        } else {
            result.merge(
                self.sync_pass(manager_id, remote, false, create_only, actor)
                    .await,
            );
        }

        info!(manager_id, %result, "reconciliation pass finished");
        result
    }

    async fn sync_pass(
        &self,
        manager_id: &str,
        remote: Vec<RemoteEntity>,
        shared: bool,
        create_only: bool,
        actor: &str,
    ) -> SyncResult {
        let mut result = SyncResult::new();

        // One pass per scope at a time; concurrent passes would race the
        // removed/added classification.
        let _pass = match self.locks.acquire_raw("sync", manager_id).await {
            Ok(guard) => guard,
            Err(err) => {
                result.fetch_error(&err);
                return result;
            }
        };

        let local = match self
            .lifecycle
            .repo()
            .find(&Criteria::And(vec![
                Criteria::eq("manager_id", manager_id),
                Criteria::eq("shared", shared.to_string()),
                Criteria::NotDeleted,
            ]))
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
            manager_id,
            shared,
            removed = sets.removed.len(),
            common = sets.common.len(),
            added = sets.added.len(),
            "matched local records against remote inventory"
        );

        // A create-only pass (shared inventory, or a caller asking for
        // gap-filling) never touches existing records, stale ones
        // included.
        if !create_only {
            for record in sets.removed {
                // A pending removal from an earlier pass is left alone.
                if record.status() == STATUS_DELETING {
                    continue;
                }
                match self.mark_for_removal(&record).await {
                    Ok(()) => result.delete(),
                    Err(err) => {
                        warn!(id = %record.id(), %err, "failed to mark record for removal");
                        result.delete_error(&err);
                    }
                }
            }
        }

        for (record, entity) in sets.common {
            if create_only {
                continue;
            }
            match self.lifecycle.sync_update(&record, &entity, actor).await {
                Ok((_, diff)) if !diff.is_empty() => result.update(),
                Ok(_) => {}
                Err(err) => {
                    warn!(id = %record.id(), %err, "failed to update record from remote");
                    result.update_error(&err);
                }
            }
        }

        for mut entity in sets.added {
            entity.shared = shared;
            match self
                .lifecycle
                .fetch_or_create(&entity, manager_id, create_only, actor)
                .await
            {
                Ok((_, true)) => result.add(),
                // Raced into existence between listing and creation
                Ok((_, false)) => {}
                Err(err) => {
                    warn!(external_id = %entity.global_id, %err,
                        "failed to create mirror record");
                    result.add_error(&err);
                }
            }
        }

        result
    }

    /// Mark a stale record and hand it to the removal task kind
    async fn mark_for_removal(&self, record: &MirroredResource) -> StratusResult<()> {
        let id = record.record_id();
        self.lifecycle
            .set_status(&id, STATUS_DELETING, "no longer present on remote")
            .await?;

        let handle = self
            .tasks
            .new_task(TASK_KIND_RESOURCE_REMOVE, &id, serde_json::Value::Null, None)?;
        self.tasks.schedule_run(handle)?;
        info!(id = %id, "dispatched removal task");
        Ok(())
    }
}
