//! Partition grouping: bins a table's pending partitions into right-sized units
//! of work for a single data-transfer task.
//!
//! Two algorithms, selected by data availability: adaptive (size-based) grouping
//! when every candidate partition reports a byte size, and static (count-based)
//! grouping otherwise. Both operate on indices into the caller's partition list
//! so groups can be bound positionally to the backing sub-jobs.

use mig_config::shared::GroupingLimits;
use tracing::debug;

use crate::metadata::model::PartitionMeta;

/// Bins partitions by size, bounding both group data size and group fan-out.
///
/// Returns `None` when any partition's size is unknown; the caller then falls
/// back to [`static_groups`]. Partitions are considered in descending size
/// order. A partition whose size alone exceeds `max_group_bytes` becomes its
/// own singleton group; otherwise partitions accumulate into the current group
/// while the running total stays within `max_group_bytes` and the count within
/// `max_partitions_per_group`.
pub fn adaptive_groups(
    partitions: &[PartitionMeta],
    limits: &GroupingLimits,
) -> Option<Vec<Vec<usize>>> {
    let mut sized = Vec::with_capacity(partitions.len());
    for (index, partition) in partitions.iter().enumerate() {
        let Some(size) = partition.size_bytes else {
            debug!(index, "partition size unknown, adaptive grouping aborted");
            return None;
        };
        sized.push((index, size));
    }

    // Descending by size; stable so equal-sized partitions keep input order.
    sized.sort_by(|a, b| b.1.cmp(&a.1));

    let mut groups = Vec::new();
    let mut i = 0;
    while i < sized.len() {
        let (index, size) = sized[i];

        // Extremely large partitions get a task each.
        if size > limits.max_group_bytes {
            groups.push(vec![index]);
            i += 1;
            continue;
        }

        let mut group = Vec::new();
        let mut total = 0u64;
        while i < sized.len() && group.len() < limits.max_partitions_per_group {
            let (index, size) = sized[i];
            if total + size > limits.max_group_bytes {
                break;
            }
            group.push(index);
            total += size;
            i += 1;
        }
        groups.push(group);
    }

    Some(groups)
}

/// Slices `partition_count` partitions into chunks of at most `max_per_group`,
/// preserving input order.
pub fn static_groups(partition_count: usize, max_per_group: usize) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    while start < partition_count {
        let end = (start + max_per_group).min(partition_count);
        groups.push((start..end).collect());
        start = end;
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn sized_partitions(sizes: &[Option<u64>]) -> Vec<PartitionMeta> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let mut partition = PartitionMeta::new(vec![format!("p{i}")]);
                partition.size_bytes = *size;
                partition
            })
            .collect()
    }

    fn limits(max_partitions: usize, max_bytes: u64) -> GroupingLimits {
        GroupingLimits {
            max_partitions_per_group: max_partitions,
            max_group_bytes: max_bytes,
        }
    }

    #[test]
    fn adaptive_packs_descending_until_threshold() {
        // Sizes [5, 3, 3, 1] GiB with an 8 GiB threshold pack as {5,3} and {3,1}.
        let partitions =
            sized_partitions(&[Some(5 * GIB), Some(3 * GIB), Some(3 * GIB), Some(GIB)]);

        let groups = adaptive_groups(&partitions, &limits(10, 8 * GIB)).unwrap();

        assert_eq!(groups, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn oversized_partition_becomes_singleton() {
        let partitions = sized_partitions(&[Some(GIB), Some(20 * GIB), Some(GIB)]);

        let groups = adaptive_groups(&partitions, &limits(10, 8 * GIB)).unwrap();

        assert_eq!(groups, vec![vec![1], vec![0, 2]]);
    }

    #[test]
    fn count_cap_bounds_fan_out() {
        let partitions = sized_partitions(&[Some(1), Some(1), Some(1), Some(1), Some(1)]);

        let groups = adaptive_groups(&partitions, &limits(2, 8 * GIB)).unwrap();

        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|group| group.len() <= 2));
    }

    #[test]
    fn unknown_size_aborts_adaptive_pass() {
        let partitions = sized_partitions(&[Some(GIB), None, Some(GIB)]);

        assert!(adaptive_groups(&partitions, &limits(10, 8 * GIB)).is_none());
    }

    #[test]
    fn adaptive_covers_every_partition_exactly_once() {
        let sizes: Vec<Option<u64>> = (0..37).map(|i| Some((i % 7 + 1) * GIB)).collect();
        let partitions = sized_partitions(&sizes);

        let groups = adaptive_groups(&partitions, &limits(4, 10 * GIB)).unwrap();

        let mut seen: Vec<usize> = groups.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..37).collect::<Vec<_>>());

        // No group (other than a forced singleton) exceeds either limit.
        for group in &groups {
            assert!(group.len() <= 4);
            let total: u64 = group
                .iter()
                .map(|&i| partitions[i].size_bytes.unwrap())
                .sum();
            assert!(group.len() == 1 || total <= 10 * GIB);
        }
    }

    #[test]
    fn static_groups_are_fixed_slices_in_order() {
        let groups = static_groups(7, 3);

        assert_eq!(groups, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn static_groups_of_empty_input_are_empty() {
        assert!(static_groups(0, 3).is_empty());
    }
}
