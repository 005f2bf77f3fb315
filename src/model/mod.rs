//! Record types for the local system-of-record

pub mod association;
pub mod base;
pub mod resource;

pub use association::{AssociationStatus, CacheAssociation};
pub use base::{ManagedBase, StandaloneBase, StatusBase};
pub use resource::MirroredResource;

/// Resource is synced and usable
pub const STATUS_READY: &str = "ready";
/// Resource removal is underway (a removal task has been dispatched)
pub const STATUS_DELETING: &str = "deleting";
/// Last task against the resource failed; real state unknown
pub const STATUS_UNKNOWN: &str = "unknown";
