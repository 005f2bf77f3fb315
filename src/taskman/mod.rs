//! Asynchronous task orchestration
//!
//! Long-running operations (payload caching, resource removal) run as
//! tasks pulled off an explicit queue by a worker pool. Task kinds are
//! registered by name at startup; every task ends in exactly one
//! terminal state.

mod orchestrator;
mod registry;
mod task;

pub use orchestrator::{TaskContext, TaskHandle, TaskOrchestrator};
pub use registry::{TaskKind, TaskKindRegistry};
pub use task::{Task, TaskState, STAGE_INIT};
