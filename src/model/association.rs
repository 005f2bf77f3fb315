//! Cache-to-payload join records

use crate::reconcile::SyncKey;
use crate::store::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Association lifecycle: INIT -> ACTIVE -> DELETING -> removed
///
/// Advances monotonically; a DELETING association is not eligible for new
/// consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationStatus {
    Init,
    Active,
    Deleting,
}

impl AssociationStatus {
    /// Whether the status may advance to `next` (monotonic order)
    pub fn can_advance_to(self, next: AssociationStatus) -> bool {
        (self as u8) < (next as u8)
    }
}

impl std::fmt::Display for AssociationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssociationStatus::Init => "init",
            AssociationStatus::Active => "active",
            AssociationStatus::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// Join record linking a cache container to a cached payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheAssociation {
    /// Owning cache container
    pub cache_id: String,

    /// Cached payload (e.g. an image)
    pub payload_id: String,

    /// Lifecycle status
    pub status: AssociationStatus,

    /// Number of active consumers; eviction prefers the least used
    pub ref_count: u32,

    /// When the association was created
    pub created_at: DateTime<Utc>,

    /// When the association was last updated
    pub updated_at: DateTime<Utc>,
}

impl CacheAssociation {
    /// Create a fresh INIT association with no consumers
    pub fn new(cache_id: impl Into<String>, payload_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            cache_id: cache_id.into(),
            payload_id: payload_id.into(),
            status: AssociationStatus::Init,
            ref_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Composite id for (cache, payload)
    pub fn id_for(cache_id: &str, payload_id: &str) -> String {
        format!("{cache_id}/{payload_id}")
    }

    /// Advance the status; ignored when it would move backwards
    pub fn advance(&mut self, next: AssociationStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}

impl Record for CacheAssociation {
    const KIND: &'static str = "cache-association";

    fn record_id(&self) -> String {
        Self::id_for(&self.cache_id, &self.payload_id)
    }

    fn fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("id", self.record_id()),
            ("cache_id", self.cache_id.clone()),
            ("payload_id", self.payload_id.clone()),
            ("status", self.status.to_string()),
            ("ref_count", self.ref_count.to_string()),
        ])
    }
}

impl SyncKey for CacheAssociation {
    fn sync_key(&self) -> String {
        self.payload_id.clone()
    }
}
