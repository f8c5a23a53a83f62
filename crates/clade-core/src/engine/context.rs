use crate::core::alignment::partition::PartitionTable;
use crate::core::alignment::weights::SiteWeights;
use crate::core::plan::WorkPlan;
use crate::engine::checkpoint::CheckpointManager;
use crate::engine::config::SearchConfig;
use crate::engine::error::EngineError;
use crate::engine::kernel::LikelihoodKernel;
use crate::engine::progress::ProgressReporter;
use std::sync::{Arc, Mutex, RwLock};

/// Shared state of one analysis, visible to every execution unit.
///
/// The plan and weight tables are swapped wholesale between bootstrap
/// replicates; units take `Arc` snapshots so an install never shifts slices
/// under an evaluation in flight.
pub struct SearchContext<'a> {
    pub table: &'a PartitionTable,
    pub config: &'a SearchConfig,
    pub kernel: &'a dyn LikelihoodKernel,
    pub reporter: &'a ProgressReporter<'a>,
    plan: RwLock<Arc<WorkPlan>>,
    weights: RwLock<Arc<SiteWeights>>,
    checkpoint: Mutex<CheckpointManager>,
}

impl<'a> SearchContext<'a> {
    pub fn new(
        table: &'a PartitionTable,
        config: &'a SearchConfig,
        kernel: &'a dyn LikelihoodKernel,
        reporter: &'a ProgressReporter<'a>,
        plan: WorkPlan,
        weights: SiteWeights,
        checkpoint: CheckpointManager,
    ) -> Self {
        Self {
            table,
            config,
            kernel,
            reporter,
            plan: RwLock::new(Arc::new(plan)),
            weights: RwLock::new(Arc::new(weights)),
            checkpoint: Mutex::new(checkpoint),
        }
    }

    pub fn plan(&self) -> Result<Arc<WorkPlan>, EngineError> {
        Ok(self
            .plan
            .read()
            .map_err(|_| EngineError::Poisoned)?
            .clone())
    }

    /// Replaces the active plan. Callers must hold the grid at a barrier so
    /// no unit still iterates the outgoing plan's slices.
    pub fn install_plan(&self, plan: WorkPlan) -> Result<(), EngineError> {
        *self.plan.write().map_err(|_| EngineError::Poisoned)? = Arc::new(plan);
        Ok(())
    }

    pub fn weights(&self) -> Result<Arc<SiteWeights>, EngineError> {
        Ok(self
            .weights
            .read()
            .map_err(|_| EngineError::Poisoned)?
            .clone())
    }

    pub fn install_weights(&self, weights: SiteWeights) -> Result<(), EngineError> {
        *self.weights.write().map_err(|_| EngineError::Poisoned)? = Arc::new(weights);
        Ok(())
    }

    pub fn with_checkpoint<T>(
        &self,
        f: impl FnOnce(&mut CheckpointManager) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut manager = self.checkpoint.lock().map_err(|_| EngineError::Poisoned)?;
        f(&mut manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::WorkItem;
    use crate::core::tree::topology::Topology;
    use crate::engine::config::SearchConfigBuilder;
    use crate::engine::kernel::PartitionModel;
    use tempfile::TempDir;

    struct NullKernel;

    impl LikelihoodKernel for NullKernel {
        fn partial_loglh(
            &self,
            _tree: &Topology,
            _models: &[PartitionModel],
            _item: &WorkItem,
            _weights: &[u32],
        ) -> Result<f64, EngineError> {
            Ok(0.0)
        }
    }

    struct TestSetup {
        table: PartitionTable,
        config: SearchConfig,
        reporter: ProgressReporter<'static>,
        _temp_dir: TempDir,
    }

    fn setup() -> TestSetup {
        let temp_dir = TempDir::new().unwrap();
        let mut table = PartitionTable::new(vec!["a".to_string(), "b".to_string()]).unwrap();
        table.push_partition("p0", 4, vec![1; 8]).unwrap();
        let config = SearchConfigBuilder::new()
            .threads(1)
            .seed(7)
            .start_trees(1)
            .checkpoint_path(temp_dir.path().join("run.ckp"))
            .build()
            .unwrap();
        TestSetup {
            table,
            config,
            reporter: ProgressReporter::new(),
            _temp_dir: temp_dir,
        }
    }

    #[test]
    fn plan_snapshots_survive_reinstall() {
        let s = setup();
        let checkpoint = CheckpointManager::open(&s.config.checkpoint.path, false).unwrap();
        let context = SearchContext::new(
            &s.table,
            &s.config,
            &NullKernel,
            &s.reporter,
            WorkPlan::new(2),
            vec![vec![1; 4]],
            checkpoint,
        );

        let before = context.plan().unwrap();
        context.install_plan(WorkPlan::new(5)).unwrap();

        assert_eq!(before.pool_size(), 2);
        assert_eq!(context.plan().unwrap().pool_size(), 5);
    }

    #[test]
    fn with_checkpoint_passes_values_and_errors_through() {
        let s = setup();
        let checkpoint = CheckpointManager::open(&s.config.checkpoint.path, false).unwrap();
        let context = SearchContext::new(
            &s.table,
            &s.config,
            &NullKernel,
            &s.reporter,
            WorkPlan::new(1),
            vec![vec![1; 4]],
            checkpoint,
        );

        let elapsed = context.with_checkpoint(|ckp| Ok(ckp.elapsed_secs())).unwrap();
        assert_eq!(elapsed, 0);

        let failure: Result<(), _> = context
            .with_checkpoint(|_| Err(EngineError::Internal("boom".to_string())));
        assert!(matches!(failure, Err(EngineError::Internal(_))));
    }
}
