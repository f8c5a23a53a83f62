//! Staged maximum-likelihood search for a single tree.
//!
//! Every execution unit drives its own [`SearchController`] over its own
//! copy of the working tree. All scores that feed accept and convergence
//! decisions come out of grid reductions, so the copies evolve through an
//! identical sequence of stages, moves, and parameter updates. Each rank
//! records every stage transition and the master rank persists them to
//! disk, which is what makes an interrupted search re-enter exactly where
//! it stopped.

use crate::core::tree::topology::Topology;
use crate::engine::checkpoint::{CheckpointRecord, ProgressMarker, ScoredTree, SearchStage};
use crate::engine::context::SearchContext;
use crate::engine::error::EngineError;
use crate::engine::kernel::PartitionModel;
use crate::engine::parallel::UnitContext;
use crate::engine::tasks;
use tracing::{debug, info, instrument};

/// Which result list a finished tree belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Ml,
    Bootstrap,
}

/// One unit's working copy of the tree under optimization.
#[derive(Debug, Clone)]
pub struct TreeState {
    pub tree: Topology,
    pub models: Vec<PartitionModel>,
    pub loglh: f64,
    pub stage: SearchStage,
}

impl TreeState {
    pub fn fresh(tree: Topology, models: Vec<PartitionModel>) -> Self {
        Self {
            tree,
            models,
            loglh: f64::NEG_INFINITY,
            stage: SearchStage::Start,
        }
    }

    /// Rebuilds the in-memory state a checkpoint recorded mid-search.
    pub fn from_record(record: &CheckpointRecord) -> Self {
        Self {
            tree: record.tree.clone(),
            models: record.models.clone(),
            loglh: record.marker.loglh,
            stage: record.marker.stage,
        }
    }
}

/// Drives one tree from its entry stage to `Converged`.
pub struct SearchController<'run, 'grid> {
    context: &'run SearchContext<'run>,
    unit: &'run UnitContext<'grid>,
}

impl<'run, 'grid> SearchController<'run, 'grid> {
    pub fn new(context: &'run SearchContext<'run>, unit: &'run UnitContext<'grid>) -> Self {
        Self { context, unit }
    }

    /// Advances `state` through the remaining stages of its search.
    ///
    /// The entry stage comes from the state itself, so a state restored from
    /// a checkpoint picks up mid-search while a fresh one starts from the
    /// initial evaluation. A state already at `Converged` passes through
    /// untouched.
    #[instrument(skip_all, name = "tree_search", fields(unit = self.unit.unit_id()))]
    pub fn run_tree(&self, state: &mut TreeState) -> Result<(), EngineError> {
        let params = &self.context.config.search;

        if state.stage == SearchStage::Start {
            state.loglh = tasks::grid_loglh(self.context, self.unit, &state.tree, &state.models)?;
            state.stage = SearchStage::ParamOptimization;
            self.sync_checkpoint(state)?;
            if self.unit.is_master() {
                info!(loglh = state.loglh, "Starting tree evaluated");
            }
        }

        if state.stage == SearchStage::ParamOptimization {
            state.loglh = tasks::refine_params::run(
                self.context,
                self.unit,
                &mut state.tree,
                &mut state.models,
                true,
                params.epsilon,
            )?;
            state.stage = SearchStage::TopologySearch { round: 0 };
            self.sync_checkpoint(state)?;
            if self.unit.is_master() {
                info!(loglh = state.loglh, "Model and branch parameters optimized");
            }
        }

        while let SearchStage::TopologySearch { round } = state.stage {
            let improved = self.search_round(state, round)?;
            state.stage = if improved {
                SearchStage::TopologySearch { round: round + 1 }
            } else {
                SearchStage::Converged
            };
            self.sync_checkpoint(state)?;
            if !improved && self.unit.is_master() {
                info!(
                    rounds = round + 1,
                    loglh = state.loglh,
                    "Topology search converged"
                );
            }
        }

        Ok(())
    }

    /// One rearrangement round: score all candidate moves within the
    /// round's radius, and take the best one only when it clears the
    /// current score by more than epsilon. An accepted move is followed by
    /// branch refinement, with model parameters joining on their cadence.
    ///
    /// Returns whether the round improved the tree; a round that does not
    /// ends the search.
    fn search_round(&self, state: &mut TreeState, round: u32) -> Result<bool, EngineError> {
        let params = &self.context.config.search;
        let radius = round_radius(params.spr_radius, round);

        let proposal =
            tasks::score_moves::run(self.context, self.unit, &state.tree, &state.models, radius)?;
        let Some((mv, move_loglh)) = proposal else {
            return Ok(false);
        };
        if move_loglh <= state.loglh + params.epsilon {
            debug!(round, radius, move_loglh, "No move clears the incumbent score");
            return Ok(false);
        }

        state.tree.apply_spr(&mv)?;
        let optimize_models = (round + 1) % params.model_opt_cadence == 0;
        state.loglh = tasks::refine_params::run(
            self.context,
            self.unit,
            &mut state.tree,
            &mut state.models,
            optimize_models,
            params.epsilon,
        )?;

        debug!(round, radius, loglh = state.loglh, "Accepted rearrangement");
        Ok(true)
    }

    /// Records a finished tree in the checkpoint. Must be called by every
    /// unit. The lead thread of each rank appends to its rank's record,
    /// keeping result counts identical across the grid; the barriers keep
    /// the peers from racing into the next tree.
    pub fn complete_tree(&self, state: &TreeState, kind: ResultKind) -> Result<(), EngineError> {
        self.unit.barrier()?;
        if self.unit.is_master_thread() {
            let result = ScoredTree {
                loglh: state.loglh,
                topology: state.tree.clone(),
            };
            self.context.with_checkpoint(|checkpoint| match kind {
                ResultKind::Ml => checkpoint.record_ml_result(result),
                ResultKind::Bootstrap => checkpoint.record_bootstrap_result(result),
            })?;
        }
        self.unit.barrier()
    }

    /// Persists a stage transition. All units arrive here at the same point
    /// of the search; the lead thread of each rank updates its record, with
    /// only the master rank's manager writing to disk. The closing barrier
    /// holds everyone until that write has landed.
    fn sync_checkpoint(&self, state: &TreeState) -> Result<(), EngineError> {
        self.unit.barrier()?;
        if self.unit.is_master_thread() {
            self.context.with_checkpoint(|checkpoint| {
                checkpoint.stage_working_state(&state.tree, &state.models)?;
                checkpoint.set_progress(ProgressMarker {
                    stage: state.stage,
                    loglh: state.loglh,
                })
            })?;
        }
        self.unit.barrier()
    }
}

/// Regraft radius for a given round. The radius halves as rounds proceed,
/// never below one edge. Depending on nothing but the round index keeps the
/// proposal sets of a resumed run identical to an uninterrupted one.
pub(crate) fn round_radius(initial: usize, round: u32) -> usize {
    (initial >> round.min(31)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alignment::partition::PartitionTable;
    use crate::core::alignment::{encoding, weights};
    use crate::core::balance::LoadBalancer;
    use crate::core::tree::topology::NodeId;
    use crate::engine::checkpoint::CheckpointManager;
    use crate::engine::config::{SearchConfig, SearchConfigBuilder};
    use crate::engine::kernel::k80::K80Kernel;
    use crate::engine::parallel::ParallelContext;
    use crate::engine::progress::ProgressReporter;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn encode_rows(rows: &[&str]) -> Vec<u8> {
        rows.iter()
            .flat_map(|row| row.chars().map(|c| encoding::encode(c).unwrap()))
            .collect()
    }

    // Two clear clades, {t0, t1} and {t2, t3}, plus t4 near the first.
    fn five_taxon_table() -> PartitionTable {
        let rows = [
            "ACGTACGTACGT",
            "ACGTACGTACGA",
            "TGCATGCATGCA",
            "TGCATGCATGCC",
            "ACGTACGAACGT",
        ];
        let taxa = (0..rows.len()).map(|i| format!("t{i}")).collect();
        let mut table = PartitionTable::new(taxa).unwrap();
        table
            .push_partition("all", 12, encode_rows(&rows))
            .unwrap();
        table
    }

    fn find_tip(tree: &Topology, taxon: usize) -> NodeId {
        tree.postorder()
            .into_iter()
            .find(|&id| tree.node(id).tip() == Some(taxon))
            .unwrap()
    }

    // Deliberately splits both clades so the search has moves to find.
    fn poor_tree() -> Topology {
        let mut tree = Topology::two_taxon(0, 2, 0.2);
        tree.attach_tip(1, find_tip(&tree, 2), 0.2).unwrap();
        tree.attach_tip(3, find_tip(&tree, 0), 0.2).unwrap();
        tree.attach_tip(4, find_tip(&tree, 3), 0.2).unwrap();
        tree
    }

    struct TestSetup {
        table: PartitionTable,
        kernel: K80Kernel,
        config: SearchConfig,
        reporter: ProgressReporter<'static>,
        _temp_dir: TempDir,
    }

    fn setup(threads: usize) -> TestSetup {
        let temp_dir = TempDir::new().unwrap();
        let table = five_taxon_table();
        let kernel = K80Kernel::new(Arc::new(table.clone()));
        let config = SearchConfigBuilder::new()
            .threads(threads)
            .seed(7)
            .start_trees(1)
            .epsilon(0.01)
            .spr_radius(4)
            .checkpoint_path(temp_dir.path().join("run.ckp"))
            .build()
            .unwrap();
        TestSetup {
            table,
            kernel,
            config,
            reporter: ProgressReporter::new(),
            _temp_dir: temp_dir,
        }
    }

    fn seeded_context<'a>(s: &'a TestSetup, tree: &'a Topology) -> SearchContext<'a> {
        let plan = LoadBalancer::with_min_slice(1)
            .plan(&s.table.workloads(), s.config.execution.threads)
            .unwrap();
        let mut checkpoint = CheckpointManager::open(&s.config.checkpoint.path, false).unwrap();
        checkpoint
            .seed(CheckpointRecord {
                taxon_count: s.table.taxon_count(),
                partition_count: s.table.partition_count(),
                models: vec![PartitionModel::default(); s.table.partition_count()],
                tree: tree.clone(),
                ml_results: Vec::new(),
                bootstrap_results: Vec::new(),
                marker: ProgressMarker::default(),
                elapsed_secs: 0,
            })
            .unwrap();
        SearchContext::new(
            &s.table,
            &s.config,
            &s.kernel,
            &s.reporter,
            plan,
            weights::unit_weights(&s.table),
            checkpoint,
        )
    }

    #[test]
    fn the_radius_schedule_halves_down_to_one_edge() {
        assert_eq!(round_radius(5, 0), 5);
        assert_eq!(round_radius(5, 1), 2);
        assert_eq!(round_radius(5, 2), 1);
        assert_eq!(round_radius(5, 9), 1);
        assert_eq!(round_radius(1, 0), 1);
        assert_eq!(round_radius(8, 40), 1);
    }

    #[test]
    fn the_search_improves_a_poor_tree_identically_on_every_unit() {
        let s = setup(2);
        let start = poor_tree();
        let context = seeded_context(&s, &start);
        let mut grid = ParallelContext::solo(2).unwrap();
        grid.reserve_reduce_buffer(16);

        let observed: Mutex<Vec<(SearchStage, f64, u64, String)>> = Mutex::new(Vec::new());
        grid.spawn(|unit| {
            let controller = SearchController::new(&context, unit);
            let mut state = TreeState::fresh(poor_tree(), vec![PartitionModel::default()]);

            let baseline = tasks::grid_loglh(&context, unit, &state.tree, &state.models)?;
            controller.run_tree(&mut state)?;

            observed.lock().unwrap().push((
                state.stage,
                baseline,
                state.loglh.to_bits(),
                state.tree.to_index_newick(),
            ));
            Ok(())
        })
        .unwrap();

        let observed = observed.into_inner().unwrap();
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[0], observed[1]);

        let (stage, baseline, loglh_bits, _) = observed[0].clone();
        assert_eq!(stage, SearchStage::Converged);
        assert!(f64::from_bits(loglh_bits) > baseline);
    }

    #[test]
    fn completing_a_tree_records_it_and_rearms_the_marker() {
        let s = setup(1);
        let start = poor_tree();
        let context = seeded_context(&s, &start);
        let mut grid = ParallelContext::solo(1).unwrap();
        grid.reserve_reduce_buffer(16);

        grid.spawn(|unit| {
            let controller = SearchController::new(&context, unit);
            let mut state = TreeState::fresh(poor_tree(), vec![PartitionModel::default()]);
            controller.run_tree(&mut state)?;
            controller.complete_tree(&state, ResultKind::Ml)?;
            Ok(())
        })
        .unwrap();

        let mut reopened = CheckpointManager::open(&s.config.checkpoint.path, true).unwrap();
        reopened
            .seed(CheckpointRecord {
                taxon_count: s.table.taxon_count(),
                partition_count: s.table.partition_count(),
                models: vec![PartitionModel::default()],
                tree: start,
                ml_results: Vec::new(),
                bootstrap_results: Vec::new(),
                marker: ProgressMarker::default(),
                elapsed_secs: 0,
            })
            .unwrap();
        let record = reopened.record().unwrap();

        assert_eq!(record.ml_results.len(), 1);
        assert!(record.ml_results[0].loglh.is_finite());
        assert_eq!(record.marker, ProgressMarker::default());
    }

    #[test]
    fn converged_states_pass_through_untouched() {
        let s = setup(1);
        let start = poor_tree();
        let context = seeded_context(&s, &start);
        let mut grid = ParallelContext::solo(1).unwrap();
        grid.reserve_reduce_buffer(16);

        grid.spawn(|unit| {
            let controller = SearchController::new(&context, unit);
            let mut state = TreeState::fresh(poor_tree(), vec![PartitionModel::default()]);
            state.stage = SearchStage::Converged;
            state.loglh = -42.0;

            controller.run_tree(&mut state)?;

            assert_eq!(state.stage, SearchStage::Converged);
            assert_eq!(state.loglh, -42.0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn restored_states_resume_from_the_recorded_stage() {
        let record = CheckpointRecord {
            taxon_count: 5,
            partition_count: 1,
            models: vec![PartitionModel { kappa: 2.5 }],
            tree: poor_tree(),
            ml_results: Vec::new(),
            bootstrap_results: Vec::new(),
            marker: ProgressMarker {
                stage: SearchStage::TopologySearch { round: 3 },
                loglh: -512.75,
            },
            elapsed_secs: 9,
        };

        let state = TreeState::from_record(&record);

        assert_eq!(state.stage, SearchStage::TopologySearch { round: 3 });
        assert_eq!(state.loglh, -512.75);
        assert_eq!(state.models[0].kappa, 2.5);
        assert_eq!(state.tree.to_index_newick(), record.tree.to_index_newick());
    }
}
