use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Limits applied when batching a table's pending partitions into transfer groups.
///
/// Both limits apply to the adaptive (size-based) algorithm; only
/// `max_partitions_per_group` applies to the static (count-based) fallback.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GroupingLimits {
    /// Maximum number of partitions a single transfer group may contain.
    #[serde(default = "default_max_partitions_per_group")]
    pub max_partitions_per_group: usize,
    /// Maximum total data size, in bytes, a single transfer group may contain.
    ///
    /// A partition larger than this on its own still becomes a singleton group.
    #[serde(default = "default_max_group_bytes")]
    pub max_group_bytes: u64,
}

impl GroupingLimits {
    /// Default maximum number of partitions per group.
    pub const DEFAULT_MAX_PARTITIONS_PER_GROUP: usize = 100;

    /// Default maximum group data size: 5 GiB.
    pub const DEFAULT_MAX_GROUP_BYTES: u64 = 5 * 1024 * 1024 * 1024;

    /// Validates grouping limits.
    ///
    /// Ensures both limits are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_partitions_per_group == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "grouping.max_partitions_per_group".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_group_bytes == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "grouping.max_group_bytes".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for GroupingLimits {
    fn default() -> Self {
        Self {
            max_partitions_per_group: default_max_partitions_per_group(),
            max_group_bytes: default_max_group_bytes(),
        }
    }
}

fn default_max_partitions_per_group() -> usize {
    GroupingLimits::DEFAULT_MAX_PARTITIONS_PER_GROUP
}

fn default_max_group_bytes() -> u64 {
    GroupingLimits::DEFAULT_MAX_GROUP_BYTES
}
