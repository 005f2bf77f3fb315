//! Embedded base structs composed into record types
//!
//! Records are built from independent capability structs combined by
//! value, with accessors on the composed type delegating inward. This
//! replaces deep base-class inheritance while keeping the field sets
//! reusable across record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity, naming and soft-delete capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandaloneBase {
    /// Local unique id
    pub id: String,

    /// Display name, locally unique within the owning manager scope
    pub name: String,

    /// Free-form description
    pub description: String,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When the record was last updated
    pub updated_at: DateTime<Utc>,

    /// Soft-delete flag
    pub deleted: bool,
}

impl StandaloneBase {
    /// Create a base with a fresh uuid
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    /// Bump the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Provider-scope capability: which credential produced the record and
/// what the remote side calls it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagedBase {
    /// Owning manager scope (provider credential/account context)
    pub manager_id: String,

    /// Remote global id; empty until first synced
    pub external_id: String,
}

/// Status capability with a manager-specific open status set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusBase {
    /// Current status
    pub status: String,

    /// Why the status was set (failure message channel)
    pub status_reason: String,
}

impl StatusBase {
    /// Set status with a reason
    pub fn set(&mut self, status: impl Into<String>, reason: impl Into<String>) {
        self.status = status.into();
        self.status_reason = reason.into();
    }
}
