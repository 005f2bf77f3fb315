//! Stratus keeps local mirror records in step with the inventories of
//! multiple cloud providers.
//!
//! The core pieces:
//!
//! - [`lockman`]: scoped advisory locks serializing concurrent work on
//!   the same entity or class
//! - [`reconcile`]: set-difference matching of local records against
//!   remote listings and the engine that converges them
//! - [`lifecycle`]: mirror record creation (exactly-once under
//!   concurrency), update-in-place and the delete policy
//! - [`taskman`]: queue-backed worker pool running long operations as
//!   stage-based tasks
//! - [`cachemgr`]: capacity-bounded payload caching with least-used
//!   eviction
//!
//! Provider API clients implement [`provider::CloudProvider`] and live
//! outside this crate; storage is anything implementing
//! [`store::Repository`].

pub mod audit;
pub mod cachemgr;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lockman;
pub mod model;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod taskman;

pub use error::{StratusError, StratusResult};
