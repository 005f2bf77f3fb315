//! Cloud provider abstraction
//!
//! Provider-specific API clients are external collaborators. Stratus only
//! needs remote entity listings, the public-cloud flag (it decides between
//! the two-phase shared-then-scoped sync and a single pass), and the
//! host's capacity predicate for cache admission.

use crate::error::{StratusError, StratusResult};
use crate::model::CacheAssociation;
use crate::reconcile::SyncKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One entity as reported by a remote provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntity {
    /// Globally unique id assigned by the provider
    pub global_id: String,

    /// Display name on the provider side
    pub name: String,

    /// Provider-side status string
    pub status: String,

    /// Region-shared entity (vs scoped to one manager credential)
    #[serde(default)]
    pub shared: bool,

    /// Provider-specific metadata, passed through untouched
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RemoteEntity {
    /// Create a scoped remote entity with empty metadata
    pub fn new(global_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            global_id: global_id.into(),
            name: name.into(),
            status: String::new(),
            shared: false,
            metadata: serde_json::Value::Null,
        }
    }
}

impl SyncKey for RemoteEntity {
    fn sync_key(&self) -> String {
        self.global_id.clone()
    }
}

/// Abstract remote provider interface
///
/// Implemented by the per-vendor API clients living outside this crate.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Human-readable provider name for display and logs
    fn provider_name(&self) -> &'static str;

    /// Public clouds sync the shared inventory separately from the
    /// scoped one; private providers get a single pass
    fn is_public_cloud(&self) -> bool;

    /// List remote entities visible to a manager scope
    async fn list_entities(&self, scope: &str) -> StratusResult<Vec<RemoteEntity>>;
}

/// Capacity predicate supplied by the owning host/driver
pub trait CapacityPredicate: Send + Sync {
    /// Whether the cache identified by `scope` is at its limit, judged
    /// over the currently ACTIVE associations
    fn is_at_limit(&self, scope: &str, active: &[CacheAssociation]) -> bool;
}

/// Built-in predicate capping the number of active associations
///
/// A limit of zero means unlimited.
pub struct FixedCapacity {
    limit: usize,
}

impl FixedCapacity {
    /// Create a predicate allowing up to `limit` active associations
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl CapacityPredicate for FixedCapacity {
    fn is_at_limit(&self, _scope: &str, active: &[CacheAssociation]) -> bool {
        self.limit > 0 && active.len() >= self.limit
    }
}

/// Explicit provider registry, built once at process start
///
/// Components that need provider lookup receive a reference to this
/// registry; there is no init-time self-registration.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CloudProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under a manager-scope name
    pub fn register(&mut self, scope: impl Into<String>, provider: Arc<dyn CloudProvider>) {
        self.providers.insert(scope.into(), provider);
    }

    /// Look up the provider serving a manager scope
    pub fn get(&self, scope: &str) -> StratusResult<Arc<dyn CloudProvider>> {
        self.providers
            .get(scope)
            .cloned()
            .ok_or_else(|| StratusError::not_found("provider", scope))
    }

    /// Registered scope names
    pub fn scopes(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}
