//! Named, scoped mutual exclusion
//!
//! Serializes concurrent mutation of the record store at three
//! granularities: class (per resource type, guards create paths), object
//! (per record id, guards update paths), and raw (arbitrary
//! namespace/name pairs, guards cross-cutting sequences such as name
//! allocation).
//!
//! Ordering invariant: when an operation needs both, the class lock is
//! acquired before the object lock. Guards release on drop, so every exit
//! path of a guarded operation releases its lock.

use crate::error::{StratusError, StratusResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

/// Key identifying one lock: (scope, key) pairs per the coordinator contract
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Per resource type, e.g. `mirrored-resource`
    Class(String),
    /// Per record id
    Object(String),
    /// Arbitrary (namespace, name) pair
    Raw(String, String),
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKey::Class(t) => write!(f, "class:{t}"),
            LockKey::Object(id) => write!(f, "object:{id}"),
            LockKey::Raw(ns, name) => write!(f, "raw:{ns}/{name}"),
        }
    }
}

/// In-process lock coordinator
///
/// One mutex per (scope, key); acquisition blocks until the holder
/// releases. A distributed backend can be simulated as unavailable via
/// [`LockRegistry::close`], after which every acquisition fails with
/// `LockUnavailable` and callers must abort their operation.
pub struct LockRegistry {
    entries: StdMutex<HashMap<LockKey, Arc<Mutex<()>>>>,
    closed: StdMutex<Option<String>>,
}

impl LockRegistry {
    /// Create an open lock registry
    pub fn new() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
            closed: StdMutex::new(None),
        }
    }

    /// Acquire the class-level lock for a resource type
    pub async fn acquire_class(&self, type_name: &str) -> StratusResult<LockGuard> {
        self.acquire(LockKey::Class(type_name.to_string())).await
    }

    /// Acquire the object-level lock for a record id
    pub async fn acquire_object(&self, id: &str) -> StratusResult<LockGuard> {
        self.acquire(LockKey::Object(id.to_string())).await
    }

    /// Acquire a raw lock for an arbitrary (namespace, name) pair
    pub async fn acquire_raw(&self, namespace: &str, name: &str) -> StratusResult<LockGuard> {
        self.acquire(LockKey::Raw(namespace.to_string(), name.to_string()))
            .await
    }

    async fn acquire(&self, key: LockKey) -> StratusResult<LockGuard> {
        if let Some(reason) = self.closed.lock().expect("lock registry poisoned").clone() {
            return Err(StratusError::LockUnavailable(reason));
        }

        let entry = {
            let mut entries = self.entries.lock().expect("lock registry poisoned");
            Arc::clone(entries.entry(key.clone()).or_default())
        };

        trace!("waiting for lock {}", key);
        let permit = entry.lock_owned().await;
        debug!("acquired lock {}", key);

        Ok(LockGuard { key, _permit: permit })
    }

    /// Mark the lock backend as unavailable
    ///
    /// Held guards stay valid until dropped; new acquisitions fail.
    pub fn close(&self, reason: impl Into<String>) {
        *self.closed.lock().expect("lock registry poisoned") = Some(reason.into());
    }

    /// Number of keys the registry has seen
    pub fn key_count(&self) -> usize {
        self.entries.lock().expect("lock registry poisoned").len()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Held lock ticket; releases its (scope, key) on drop
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    key: LockKey,
    _permit: OwnedMutexGuard<()>,
}

impl LockGuard {
    /// The (scope, key) this guard holds
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Release explicitly; consuming the guard makes double-release
    /// impossible within one logical operation
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!("released lock {}", self.key);
    }
}
