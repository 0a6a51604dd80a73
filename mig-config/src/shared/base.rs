use thiserror::Error;

/// Errors produced when validating configuration values.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The scheduler poll interval must be non-zero.
    #[error("scheduler.poll_interval_ms must be greater than 0")]
    PollIntervalZero,

    /// At least one task worker is required to make progress.
    #[error("scheduler.max_task_workers must be greater than 0")]
    MaxTaskWorkersZero,

    /// Jobs must be allowed at least one attempt.
    #[error("default_max_attempts must be greater than 0")]
    DefaultMaxAttemptsZero,

    /// A field failed a constraint that is easier to express in prose.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
