use serde::{Deserialize, Serialize};

use crate::shared::{GroupingLimits, ResourceConfig, ValidationError};

/// Configuration for the migration orchestrator.
///
/// Contains all settings required to run the scheduler loop, bound worker
/// concurrency, and control retry and partition-grouping behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Milliseconds between scheduler polls of the job tree.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of task workers that can run at the same time.
    #[serde(default = "default_max_task_workers")]
    pub max_task_workers: u16,
    /// Maximum attempts a job is given before it fails terminally, unless the
    /// submitted job spec overrides it.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Upper bound on executable tasks gathered from one catalog job per poll,
    /// so a single large catalog cannot starve the scheduling loop.
    #[serde(default = "default_executable_task_batch")]
    pub executable_task_batch: usize,
    /// Partition grouping limits applied when a job spec does not override them.
    #[serde(default)]
    pub grouping: GroupingLimits,
    /// Capacities for the shared resource admission gate.
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl OrchestratorConfig {
    /// Default scheduler poll interval in milliseconds.
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

    /// Default maximum number of concurrent task workers.
    pub const DEFAULT_MAX_TASK_WORKERS: u16 = 8;

    /// Default maximum job attempts.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Default executable-task batch size per catalog job poll.
    pub const DEFAULT_EXECUTABLE_TASK_BATCH: usize = 3;

    /// Validates orchestrator configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::PollIntervalZero);
        }

        if self.max_task_workers == 0 {
            return Err(ValidationError::MaxTaskWorkersZero);
        }

        if self.default_max_attempts == 0 {
            return Err(ValidationError::DefaultMaxAttemptsZero);
        }

        if self.executable_task_batch == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "executable_task_batch".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        self.grouping.validate()?;
        self.resources.validate()?;

        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_task_workers: default_max_task_workers(),
            default_max_attempts: default_max_attempts(),
            executable_task_batch: default_executable_task_batch(),
            grouping: GroupingLimits::default(),
            resources: ResourceConfig::default(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    OrchestratorConfig::DEFAULT_POLL_INTERVAL_MS
}

fn default_max_task_workers() -> u16 {
    OrchestratorConfig::DEFAULT_MAX_TASK_WORKERS
}

fn default_max_attempts() -> u32 {
    OrchestratorConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_executable_task_batch() -> usize {
    OrchestratorConfig::DEFAULT_EXECUTABLE_TASK_BATCH
}
