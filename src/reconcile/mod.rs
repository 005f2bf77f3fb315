//! Remote-to-local reconciliation
//!
//! One pass lists the remote inventory for a manager scope, matches it
//! against the local mirror records by stable key, and converges the
//! local side: stale records are marked and handed to removal tasks,
//! drifted records are updated in place, and unknown remote entities get
//! fresh mirror records. Entry failures are isolated and aggregated in
//! [`SyncResult`].

mod compare;
mod engine;
mod result;

pub use compare::{compare_sets, ComparedSets, SyncKey};
pub use engine::{SyncEngine, TASK_KIND_RESOURCE_REMOVE};
pub use result::SyncResult;
