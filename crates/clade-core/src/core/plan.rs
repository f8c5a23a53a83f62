use crate::core::alignment::partition::PartitionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub partition_id: PartitionId,
    pub start: usize,
    pub length: usize,
    // The first slice of each partition owns partition-global side effects,
    // so per-partition terms are applied exactly once across the grid.
    pub master: bool,
}

impl WorkItem {
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkPlan {
    assignments: Vec<Vec<WorkItem>>,
}

impl WorkPlan {
    pub fn new(pool_size: usize) -> Self {
        Self {
            assignments: vec![Vec::new(); pool_size],
        }
    }

    pub fn pool_size(&self) -> usize {
        self.assignments.len()
    }

    pub fn items(&self, unit: usize) -> &[WorkItem] {
        &self.assignments[unit]
    }

    pub fn unit_load(&self, unit: usize) -> usize {
        self.assignments[unit].iter().map(|i| i.length).sum()
    }

    pub fn max_load(&self) -> usize {
        (0..self.pool_size())
            .map(|u| self.unit_load(u))
            .max()
            .unwrap_or(0)
    }

    pub fn total_load(&self) -> usize {
        (0..self.pool_size()).map(|u| self.unit_load(u)).sum()
    }

    pub(crate) fn push(&mut self, unit: usize, item: WorkItem) {
        self.assignments[unit].push(item);
    }

    pub(crate) fn assignments_mut(&mut self) -> &mut [Vec<WorkItem>] {
        &mut self.assignments
    }
}
