//! Local mirror records for cloud-side entities

use crate::model::base::{ManagedBase, StandaloneBase, StatusBase};
use crate::model::STATUS_READY;
use crate::reconcile::SyncKey;
use crate::store::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A local record mirroring one remote cloud entity
///
/// Invariant: (external_id, manager_id) is unique across non-deleted
/// records: at most one local mirror per remote entity per provider
/// scope. Enforced by the lifecycle manager under the class lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirroredResource {
    /// Identity, name, soft-delete
    pub base: StandaloneBase,

    /// Provider scope and remote id
    pub managed: ManagedBase,

    /// Manager-specific status
    pub state: StatusBase,

    /// Part of the region-shared inventory rather than the scoped one
    /// (public-cloud providers sync the two in separate phases)
    pub shared: bool,
}

impl MirroredResource {
    /// Create a record mirroring a remote entity
    pub fn new(
        name: impl Into<String>,
        external_id: impl Into<String>,
        manager_id: impl Into<String>,
    ) -> Self {
        Self {
            base: StandaloneBase::new(name),
            managed: ManagedBase {
                manager_id: manager_id.into(),
                external_id: external_id.into(),
            },
            state: StatusBase {
                status: STATUS_READY.to_string(),
                status_reason: String::new(),
            },
            shared: false,
        }
    }

    /// Local id
    pub fn id(&self) -> &str {
        &self.base.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.base.name
    }

    /// Remote global id; empty if never synced
    pub fn external_id(&self) -> &str {
        &self.managed.external_id
    }

    /// Owning manager scope
    pub fn manager_id(&self) -> &str {
        &self.managed.manager_id
    }

    /// Current status
    pub fn status(&self) -> &str {
        &self.state.status
    }

    /// Soft-deleted?
    pub fn is_deleted(&self) -> bool {
        self.base.deleted
    }

    /// Set status and reason, bumping the update timestamp
    pub fn set_status(&mut self, status: &str, reason: &str) {
        self.state.set(status, reason);
        self.base.touch();
    }

    /// Soft-mark the record as deleted
    pub fn mark_deleted(&mut self) {
        self.base.deleted = true;
        self.base.touch();
    }
}

impl Record for MirroredResource {
    const KIND: &'static str = "mirrored-resource";

    fn record_id(&self) -> String {
        self.base.id.clone()
    }

    // Timestamps stay out of the projection so sync diffs only report
    // fields that actually carry state.
    fn fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("id", self.base.id.clone()),
            ("name", self.base.name.clone()),
            ("description", self.base.description.clone()),
            ("external_id", self.managed.external_id.clone()),
            ("manager_id", self.managed.manager_id.clone()),
            ("status", self.state.status.clone()),
            ("deleted", self.base.deleted.to_string()),
            ("shared", self.shared.to_string()),
        ])
    }
}

impl SyncKey for MirroredResource {
    fn sync_key(&self) -> String {
        self.managed.external_id.clone()
    }
}
