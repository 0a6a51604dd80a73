//! Configuration objects for the migration orchestrator.
//!
//! This module contains re-exported configurations that are needed by the engine.

// Re-exports.
pub use mig_config::shared::*;
