use crate::core::alignment::partition::PartitionId;
use crate::core::alignment::weights::nonzero_positions;
use crate::core::plan::{WorkItem, WorkPlan};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

pub const MIN_SLICE_COLUMNS: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("Work plans require at least one execution unit")]
    EmptyPool,
    #[error("Partition {0} carries no workload")]
    EmptyPartition(PartitionId),
}

#[derive(Debug, Clone)]
pub struct LoadBalancer {
    min_slice: usize,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self {
            min_slice: MIN_SLICE_COLUMNS,
        }
    }
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_slice(min_slice: usize) -> Self {
        Self {
            min_slice: min_slice.max(1),
        }
    }

    /// Distributes partition workloads across a flat pool of execution units.
    ///
    /// Partitions are placed largest-first against a water line recomputed after
    /// every split, and split across consecutive units when they overflow it. The
    /// resulting worst-case unit load never exceeds the ideal per-unit share by
    /// more than one fragment rounding.
    pub fn plan(
        &self,
        workloads: &[(PartitionId, usize)],
        pool_size: usize,
    ) -> Result<WorkPlan, BalanceError> {
        if pool_size == 0 {
            return Err(BalanceError::EmptyPool);
        }
        for &(id, size) in workloads {
            if size == 0 {
                return Err(BalanceError::EmptyPartition(id));
            }
        }

        let mut order: Vec<usize> = (0..workloads.len()).collect();
        order.sort_by(|&a, &b| {
            workloads[b]
                .1
                .cmp(&workloads[a].1)
                .then(workloads[a].0.cmp(&workloads[b].0))
        });

        let mut plan = WorkPlan::new(pool_size);
        let mut loads = vec![0usize; pool_size];
        let mut unit = 0usize;
        let mut unassigned: usize = workloads.iter().map(|&(_, size)| size).sum();

        for &w in &order {
            let (partition_id, size) = workloads[w];
            let mut offset = 0usize;
            let mut left = size;
            while left > 0 {
                let open = pool_size - unit;
                let line = (unassigned + loads[unit]).div_ceil(open);
                let room = line.saturating_sub(loads[unit]);
                if room == 0 {
                    // Unit already filled past the current line by an earlier
                    // granularity adjustment; open >= 2 whenever work remains.
                    unit += 1;
                    continue;
                }

                let mut take = left.min(room);
                if take < left && take < self.min_slice {
                    take = left.min(self.min_slice);
                }
                if take < left && left - take < self.min_slice {
                    take = left;
                }

                plan.push(
                    unit,
                    WorkItem {
                        partition_id,
                        start: offset,
                        length: take,
                        master: offset == 0,
                    },
                );
                loads[unit] += take;
                unassigned -= take;
                offset += take;
                left -= take;

                if loads[unit] >= line && unit + 1 < pool_size {
                    unit += 1;
                }
            }
        }

        debug!(
            pool_size,
            max_load = plan.max_load(),
            total = plan.total_load(),
            "Work plan computed."
        );
        Ok(plan)
    }

    /// Plans over the nonzero-weight columns only, then translates every slice
    /// back into original column coordinates.
    ///
    /// The first slice of a partition absorbs any leading zero-weight columns;
    /// slices may leave zero-weight gaps between one another. Slice boundaries in
    /// original coordinates always land on nonzero-weight columns, so the sliced
    /// effective workload is exactly the planned compressed workload.
    pub fn plan_compressed(
        &self,
        site_weights: &[(PartitionId, &[u32])],
        pool_size: usize,
    ) -> Result<WorkPlan, BalanceError> {
        let mut position_maps: HashMap<PartitionId, Vec<usize>> =
            HashMap::with_capacity(site_weights.len());
        let mut workloads = Vec::with_capacity(site_weights.len());
        for &(id, weights) in site_weights {
            let positions = nonzero_positions(weights);
            workloads.push((id, positions.len()));
            position_maps.insert(id, positions);
        }

        let mut plan = self.plan(&workloads, pool_size)?;
        for items in plan.assignments_mut() {
            for item in items {
                let positions = &position_maps[&item.partition_id];
                let compressed_last = item.start + item.length - 1;
                let start = if item.start == 0 {
                    0
                } else {
                    positions[item.start]
                };
                item.length = positions[compressed_last] - start + 1;
                item.start = start;
            }
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered_columns(plan: &WorkPlan, partition_id: PartitionId) -> Vec<(usize, usize)> {
        let mut slices: Vec<(usize, usize)> = (0..plan.pool_size())
            .flat_map(|u| plan.items(u).iter())
            .filter(|i| i.partition_id == partition_id)
            .map(|i| (i.start, i.length))
            .collect();
        slices.sort_unstable();
        slices
    }

    #[test]
    fn plan_splits_dominant_partition_across_all_units() {
        let balancer = LoadBalancer::new();
        let plan = balancer
            .plan(&[(0, 1000), (1, 10), (2, 10), (3, 10)], 4)
            .unwrap();

        let ideal = 1030usize.div_ceil(4);
        assert!(plan.max_load() <= ideal);
        for unit in 0..4 {
            assert!(plan.unit_load(unit) > 0);
        }

        let slices = covered_columns(&plan, 0);
        let mut expected_start = 0;
        for &(start, length) in &slices {
            assert_eq!(start, expected_start);
            expected_start = start + length;
        }
        assert_eq!(expected_start, 1000);
        for pid in 1..4 {
            assert_eq!(covered_columns(&plan, pid), vec![(0, 10)]);
        }
    }

    #[test]
    fn plan_evens_out_two_uneven_partitions() {
        let balancer = LoadBalancer::new();
        let plan = balancer.plan(&[(0, 700), (1, 300)], 2).unwrap();

        assert_eq!(plan.unit_load(0), 500);
        assert_eq!(plan.unit_load(1), 500);
        assert_eq!(covered_columns(&plan, 0), vec![(0, 500), (500, 200)]);
        assert_eq!(covered_columns(&plan, 1), vec![(0, 300)]);
    }

    #[test]
    fn plan_marks_exactly_one_master_slice_per_partition() {
        let balancer = LoadBalancer::new();
        let plan = balancer.plan(&[(0, 97), (1, 61), (2, 13)], 5).unwrap();

        for pid in 0..3 {
            let masters: Vec<_> = (0..plan.pool_size())
                .flat_map(|u| plan.items(u).iter())
                .filter(|i| i.partition_id == pid && i.master)
                .collect();
            assert_eq!(masters.len(), 1);
            assert_eq!(masters[0].start, 0);
        }
    }

    #[test]
    fn plan_is_deterministic_for_equal_sized_partitions() {
        let balancer = LoadBalancer::new();
        let workloads = [(0, 50), (1, 50), (2, 50)];

        let first = balancer.plan(&workloads, 4).unwrap();
        let second = balancer.plan(&workloads, 4).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn plan_respects_minimum_slice_granularity() {
        let balancer = LoadBalancer::with_min_slice(10);
        let plan = balancer.plan(&[(0, 25)], 3).unwrap();

        for unit in 0..3 {
            for item in plan.items(unit) {
                assert!(item.length >= 10 || item.length == 25);
            }
        }
        assert_eq!(
            covered_columns(&plan, 0).iter().map(|&(_, l)| l).sum::<usize>(),
            25
        );
    }

    #[test]
    fn plan_rejects_empty_pool_and_empty_partitions() {
        let balancer = LoadBalancer::new();

        assert_eq!(
            balancer.plan(&[(0, 10)], 0).unwrap_err(),
            BalanceError::EmptyPool
        );
        assert_eq!(
            balancer.plan(&[(0, 10), (1, 0)], 2).unwrap_err(),
            BalanceError::EmptyPartition(1)
        );
    }

    #[test]
    fn compressed_plan_remaps_slices_to_original_coordinates() {
        let balancer = LoadBalancer::with_min_slice(1);
        // Ten columns, six carrying weight: compressed positions 0..6 map to
        // original columns [1, 2, 4, 6, 7, 9].
        let weights = [0u32, 2, 1, 0, 1, 0, 3, 1, 0, 2];
        let plan = balancer.plan_compressed(&[(0, &weights)], 2).unwrap();

        let slices = covered_columns(&plan, 0);
        assert_eq!(slices.len(), 2);

        // The first slice starts at column zero and absorbs the leading
        // zero-weight column.
        assert_eq!(slices[0].0, 0);
        // Every slice boundary lands on a nonzero-weight column.
        for &(start, length) in &slices {
            let last = start + length - 1;
            assert!(weights[last] > 0);
            if start > 0 {
                assert!(weights[start] > 0);
            }
        }
        // Effective (weighted) halves match the compressed split of 6 = 3 + 3.
        let effective = |start: usize, length: usize| {
            weights[start..start + length]
                .iter()
                .filter(|&&w| w > 0)
                .count()
        };
        assert_eq!(effective(slices[0].0, slices[0].1), 3);
        assert_eq!(effective(slices[1].0, slices[1].1), 3);
    }

    #[test]
    fn randomized_workloads_are_covered_exactly_once_per_partition() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(414);
        let balancer = LoadBalancer::new();
        for _ in 0..400 {
            let pool_size = rng.gen_range(1..=8);
            let partitions = rng.gen_range(1..=6);
            let workloads: Vec<(PartitionId, usize)> = (0..partitions)
                .map(|id| (id, rng.gen_range(1..=400)))
                .collect();

            let plan = balancer.plan(&workloads, pool_size).unwrap();
            assert_eq!(plan, balancer.plan(&workloads, pool_size).unwrap());

            for &(pid, size) in &workloads {
                let slices = covered_columns(&plan, pid);
                let mut expected_start = 0;
                for &(start, length) in &slices {
                    assert_eq!(start, expected_start);
                    expected_start = start + length;
                }
                assert_eq!(expected_start, size);

                let masters = (0..plan.pool_size())
                    .flat_map(|u| plan.items(u).iter())
                    .filter(|i| i.partition_id == pid && i.master)
                    .count();
                assert_eq!(masters, 1);
            }
            // Contiguity per unit: a partition never contributes two slices
            // to the same compute unit.
            for unit in 0..pool_size {
                let mut touched = std::collections::HashSet::new();
                for item in plan.items(unit) {
                    assert!(touched.insert(item.partition_id));
                }
            }
        }
    }

    #[test]
    fn randomized_compressed_plans_cover_every_weighted_column_once() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(88);
        let balancer = LoadBalancer::with_min_slice(1);
        for _ in 0..300 {
            let pool_size = rng.gen_range(1..=4);
            let partitions = rng.gen_range(1..=3);
            let weight_rows: Vec<Vec<u32>> = (0..partitions)
                .map(|_| {
                    let columns = rng.gen_range(1..=60);
                    let mut row: Vec<u32> =
                        (0..columns).map(|_| rng.gen_range(0..=3)).collect();
                    if row.iter().all(|&w| w == 0) {
                        let column = rng.gen_range(0..columns);
                        row[column] = 1;
                    }
                    row
                })
                .collect();
            let site_weights: Vec<(PartitionId, &[u32])> = weight_rows
                .iter()
                .enumerate()
                .map(|(id, row)| (id, row.as_slice()))
                .collect();

            let plan = balancer.plan_compressed(&site_weights, pool_size).unwrap();

            for (pid, row) in weight_rows.iter().enumerate() {
                let mut coverage = vec![0u32; row.len()];
                let mut previous_end = 0;
                for (start, length) in covered_columns(&plan, pid) {
                    assert!(start >= previous_end);
                    assert!(start + length <= row.len());
                    previous_end = start + length;
                    for counter in &mut coverage[start..start + length] {
                        *counter += 1;
                    }
                }
                for (column, &weight) in row.iter().enumerate() {
                    if weight > 0 {
                        assert_eq!(
                            coverage[column], 1,
                            "weighted column {column} of partition {pid} not covered exactly once"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn compressed_plan_handles_fully_weighted_partitions_like_plan() {
        let balancer = LoadBalancer::new();
        let weights = vec![1u32; 700];
        let second = vec![1u32; 300];
        let compressed = balancer
            .plan_compressed(&[(0, &weights), (1, &second)], 2)
            .unwrap();
        let plain = balancer.plan(&[(0, 700), (1, 300)], 2).unwrap();

        assert_eq!(compressed, plain);
    }
}
