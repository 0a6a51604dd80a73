use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Capacities for the shared resource admission gate.
///
/// Each field bounds how many actions of that kind may hold a reservation at
/// the same time, preventing oversubscription of the remote systems.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResourceConfig {
    /// Concurrent data-transfer workers across all jobs.
    #[serde(default = "default_data_transfer_workers")]
    pub data_transfer_workers: u64,
    /// Concurrent metadata (DDL-shaped) operations across all jobs.
    #[serde(default = "default_metadata_workers")]
    pub metadata_workers: u64,
    /// Concurrent verification queries across all jobs.
    #[serde(default = "default_verification_workers")]
    pub verification_workers: u64,
}

impl ResourceConfig {
    /// Default number of concurrent data-transfer workers.
    pub const DEFAULT_DATA_TRANSFER_WORKERS: u64 = 25;

    /// Default number of concurrent metadata operations.
    pub const DEFAULT_METADATA_WORKERS: u64 = 10;

    /// Default number of concurrent verification queries.
    pub const DEFAULT_VERIFICATION_WORKERS: u64 = 5;

    /// Validates resource capacities.
    ///
    /// Every capacity must be non-zero, otherwise actions of that kind could
    /// never be admitted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("resources.data_transfer_workers", self.data_transfer_workers),
            ("resources.metadata_workers", self.metadata_workers),
            (
                "resources.verification_workers",
                self.verification_workers,
            ),
        ] {
            if value == 0 {
                return Err(ValidationError::InvalidFieldValue {
                    field: field.to_string(),
                    constraint: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            data_transfer_workers: default_data_transfer_workers(),
            metadata_workers: default_metadata_workers(),
            verification_workers: default_verification_workers(),
        }
    }
}

fn default_data_transfer_workers() -> u64 {
    ResourceConfig::DEFAULT_DATA_TRANSFER_WORKERS
}

fn default_metadata_workers() -> u64 {
    ResourceConfig::DEFAULT_METADATA_WORKERS
}

fn default_verification_workers() -> u64 {
    ResourceConfig::DEFAULT_VERIFICATION_WORKERS
}
