//! Shared helpers for unit and integration tests: an in-memory metadata
//! source, a scriptable execution backend, and a notifying job store.

pub mod backend;
pub mod meta;
pub mod notify;
pub mod store;

pub use backend::{BackendCall, ScriptedBackend};
pub use meta::StaticMetaSource;
pub use notify::TimedNotify;
pub use store::NotifyingJobStore;

use mig_config::shared::{OrchestratorConfig, ResourceConfig};

/// Orchestrator configuration tuned for tests: tight poll interval, small
/// worker cap, everything else default.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval_ms: 25,
        max_task_workers: 4,
        default_max_attempts: 3,
        executable_task_batch: 3,
        grouping: Default::default(),
        resources: ResourceConfig::default(),
    }
}
