//! Configuration loading and shared configuration types for the migration
//! orchestrator.
//!
//! Configuration is loaded hierarchically: a base file, an environment-specific
//! file, and `APP_`-prefixed environment variable overrides.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config};
