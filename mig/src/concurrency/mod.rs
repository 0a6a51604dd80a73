//! Concurrency primitives used to coordinate the scheduler and task workers.

pub mod shutdown;
pub mod signal;
