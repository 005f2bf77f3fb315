//! Task-kind registry
//!
//! Kinds are registered explicitly when the registry is built at process
//! start and resolved by symbolic name; there is no init-time
//! self-registration. Task construction fails fast on unknown kinds.

use crate::error::{StratusError, StratusResult};
use crate::taskman::orchestrator::TaskContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered task implementation
///
/// Workers call `on_init` first; implementations drive themselves through
/// any further internal stages with [`TaskContext::set_stage`] and must
/// eventually reach exactly one terminal call
/// ([`TaskContext::set_stage_complete`] or
/// [`TaskContext::set_stage_failed`]).
#[async_trait]
pub trait TaskKind: Send + Sync {
    /// First callback after the task is scheduled
    async fn on_init(&self, ctx: TaskContext);

    /// Later internal stages; the default treats any chained stage as a
    /// programming error
    async fn on_stage(&self, ctx: TaskContext, stage: &str) {
        ctx.set_stage_failed(format!("unhandled task stage: {stage}"))
            .await;
    }
}

/// Symbolic name to task implementation mapping
#[derive(Default)]
pub struct TaskKindRegistry {
    kinds: HashMap<String, Arc<dyn TaskKind>>,
}

impl TaskKindRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under a kind name
    pub fn register(&mut self, kind: impl Into<String>, imp: Arc<dyn TaskKind>) {
        self.kinds.insert(kind.into(), imp);
    }

    /// Whether a kind name is registered
    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Resolve a kind name
    pub fn get(&self, kind: &str) -> StratusResult<Arc<dyn TaskKind>> {
        self.kinds
            .get(kind)
            .cloned()
            .ok_or_else(|| StratusError::UnknownTaskKind(kind.to_string()))
    }
}
