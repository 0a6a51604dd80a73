//! Shared-resource admission and per-object serialization.

pub mod gate;
pub mod object_lock;

pub use gate::{ResourceDemand, ResourceGate, ResourceGrant, ResourceKind};
pub use object_lock::ObjectLocks;
