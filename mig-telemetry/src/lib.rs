//! Telemetry initialization for the migration orchestrator.

pub mod tracing;
