use crate::core::alignment::partition::{PartitionId, PartitionTable};
use crate::core::alignment::weights::{
    bootstrap_weights, derive_seed, unit_weights, STREAM_BOOTSTRAP_TREE, STREAM_ML_TREE,
    STREAM_TEMPLATE,
};
use crate::core::balance::LoadBalancer;
use crate::core::tree::build::random_topology;
use crate::engine::checkpoint::{
    CheckpointManager, CheckpointRecord, ProgressMarker, ScoredTree, SearchStage,
};
use crate::engine::config::SearchConfig;
use crate::engine::context::SearchContext;
use crate::engine::error::EngineError;
use crate::engine::kernel::{LikelihoodKernel, PartitionModel};
use crate::engine::optimizer::{ResultKind, SearchController, TreeState};
use crate::engine::parallel::transport::{RankTransport, SoloTransport};
use crate::engine::parallel::{ParallelContext, UnitContext};
use crate::engine::progress::{Progress, ProgressReporter};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info, instrument, warn};

// Effective alignment columns each unit should carry. The soft bound triples
// on grids under eight units; the hard bound fails the run unless forced.
const SOFT_COLUMNS_PER_UNIT: usize = 600;
const HARD_COLUMNS_PER_UNIT: usize = 150;
const SMALL_GRID_UNITS: usize = 8;

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: ScoredTree,
    pub ml_trees: Vec<ScoredTree>,
    pub bootstrap_trees: Vec<ScoredTree>,
    pub elapsed_secs: u64,
}

/// Runs the full inference on a single rank.
pub fn run(
    table: &PartitionTable,
    config: &SearchConfig,
    kernel: &dyn LikelihoodKernel,
    reporter: &ProgressReporter,
) -> Result<SearchOutcome, EngineError> {
    run_with_transport(table, config, kernel, reporter, Box::new(SoloTransport))
}

/// Runs the full inference: maximum-likelihood searches from every starting
/// tree, then the configured bootstrap replicates, resuming from an existing
/// checkpoint when one is present.
#[instrument(skip_all, name = "search_workflow")]
pub fn run_with_transport(
    table: &PartitionTable,
    config: &SearchConfig,
    kernel: &dyn LikelihoodKernel,
    reporter: &ProgressReporter,
    transport: Box<dyn RankTransport>,
) -> Result<SearchOutcome, EngineError> {
    // === Phase 0: Validation and Work Distribution ===
    reporter.report(Progress::PhaseStart {
        name: "Preparation",
    });
    info!(
        taxa = table.taxon_count(),
        partitions = table.partition_count(),
        threads = config.execution.threads,
        ranks = transport.rank_count(),
        "Starting workflow setup: distributing work and opening the run record."
    );

    validate_inputs(table)?;
    let unit_count = config.execution.threads * transport.rank_count();
    check_unit_headroom(table, unit_count, config.execution.force)?;
    let plan = LoadBalancer::new().plan(&table.workloads(), unit_count)?;

    // === Phase 1: Durable Run State ===
    // Only the master rank writes the checkpoint file; the other ranks hold
    // in-memory mirrors of the same record.
    let mut checkpoint = if transport.rank() == 0 {
        CheckpointManager::open(&config.checkpoint.path, config.checkpoint.resume)?
    } else {
        CheckpointManager::open_mirror(&config.checkpoint.path, config.checkpoint.resume)?
    };
    checkpoint.seed(template_record(table, config)?)?;

    // === Phase 2: Execution Grid ===
    let mut parallel = ParallelContext::new(config.execution.threads, transport)?;
    parallel.reserve_reduce_buffer(reduce_slots(table.partition_count()));
    let context = SearchContext::new(
        table,
        config,
        kernel,
        reporter,
        plan,
        unit_weights(table),
        checkpoint,
    );
    reporter.report(Progress::PhaseFinish);

    // === Phase 3: Tree Searches ===
    reporter.report(Progress::PhaseStart {
        name: "Tree Search",
    });
    reporter.report(Progress::TaskStart {
        total_steps: (config.search.start_trees + config.search.bootstrap_replicates) as u64,
    });

    parallel.spawn(|unit| worker_entry(&context, unit))?;

    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    // === Phase 4: Results ===
    let outcome = finalize_results(&context)?;
    context.with_checkpoint(|manager| manager.remove())?;

    info!(
        best_loglh = outcome.best.loglh,
        ml_trees = outcome.ml_trees.len(),
        bootstrap_trees = outcome.bootstrap_trees.len(),
        elapsed_secs = outcome.elapsed_secs,
        "Workflow complete."
    );
    Ok(outcome)
}

// One unit's walk over every start tree and bootstrap replicate. All units
// take the same path through this function; trees already on record are
// skipped by everyone in lockstep.
fn worker_entry(context: &SearchContext<'_>, unit: &UnitContext<'_>) -> Result<(), EngineError> {
    let params = &context.config.search;
    let controller = SearchController::new(context, unit);

    for index in 0..params.start_trees {
        let recorded = context.with_checkpoint(|m| Ok(m.record()?.ml_results.len()))?;
        if index < recorded {
            report_skip(context, unit, index, false);
            continue;
        }

        let mut state = entry_state(context, STREAM_ML_TREE, index)?;
        controller.run_tree(&mut state)?;
        controller.complete_tree(&state, ResultKind::Ml)?;
        report_scored(context, unit, index, false, state.loglh);
    }

    for replicate in 0..params.bootstrap_replicates {
        let recorded = context.with_checkpoint(|m| Ok(m.record()?.bootstrap_results.len()))?;
        if replicate < recorded {
            report_skip(context, unit, replicate, true);
            continue;
        }

        install_replicate_load(context, unit, replicate)?;
        let mut state = entry_state(context, STREAM_BOOTSTRAP_TREE, replicate)?;
        controller.run_tree(&mut state)?;
        controller.complete_tree(&state, ResultKind::Bootstrap)?;
        report_scored(context, unit, replicate, true, state.loglh);
    }

    Ok(())
}

// The next unrecorded tree resumes from the checkpoint when the marker shows
// it was interrupted mid-search, and starts from a seeded random topology
// otherwise. Model parameters carry over from the record either way.
fn entry_state(
    context: &SearchContext<'_>,
    stream: u64,
    index: usize,
) -> Result<TreeState, EngineError> {
    context.with_checkpoint(|manager| {
        let record = manager.record()?;
        if record.marker.stage != SearchStage::Start {
            return Ok(TreeState::from_record(record));
        }
        let seed = derive_seed(context.config.search.seed, stream, index as u64);
        let tree = random_topology(record.taxon_count, &mut SmallRng::seed_from_u64(seed))?;
        Ok(TreeState::fresh(tree, record.models.clone()))
    })
}

// Rebuilds the site weights and the compressed work plan for one bootstrap
// replicate. The resample derives from the run seed and replicate index
// alone, so a resumed run regenerates it identically. One thread per rank
// writes; the barriers keep readers out of the swap window.
fn install_replicate_load(
    context: &SearchContext<'_>,
    unit: &UnitContext<'_>,
    replicate: usize,
) -> Result<(), EngineError> {
    unit.barrier()?;
    if unit.is_master_thread() {
        let weights = bootstrap_weights(context.table, context.config.search.seed, replicate);
        let per_partition: Vec<(PartitionId, &[u32])> = weights
            .iter()
            .enumerate()
            .map(|(id, row)| (id, row.as_slice()))
            .collect();
        let plan = LoadBalancer::new().plan_compressed(&per_partition, unit.unit_count())?;
        context.install_plan(plan)?;
        context.install_weights(weights)?;
        debug!(replicate, "Installed resampled site weights and work plan");
    }
    unit.barrier()
}

fn report_skip(context: &SearchContext<'_>, unit: &UnitContext<'_>, index: usize, bootstrap: bool) {
    if unit.is_master() {
        debug!(index, bootstrap, "Tree already recorded, skipping");
        context.reporter.report(Progress::TaskIncrement);
    }
}

fn report_scored(
    context: &SearchContext<'_>,
    unit: &UnitContext<'_>,
    index: usize,
    bootstrap: bool,
    loglh: f64,
) {
    if unit.is_master() {
        context.reporter.report(Progress::TreeScored {
            index,
            bootstrap,
            loglh,
        });
        context.reporter.report(Progress::TaskIncrement);
    }
}

// Template record installed at seeding: default models plus a deterministic
// stepwise-addition topology. A valid record loaded from disk replaces it
// wholesale.
fn template_record(
    table: &PartitionTable,
    config: &SearchConfig,
) -> Result<CheckpointRecord, EngineError> {
    let seed = derive_seed(config.search.seed, STREAM_TEMPLATE, 0);
    let tree = random_topology(table.taxon_count(), &mut SmallRng::seed_from_u64(seed))?;
    Ok(CheckpointRecord {
        taxon_count: table.taxon_count(),
        partition_count: table.partition_count(),
        models: vec![PartitionModel::default(); table.partition_count()],
        tree,
        ml_results: Vec::new(),
        bootstrap_results: Vec::new(),
        marker: ProgressMarker::default(),
        elapsed_secs: 0,
    })
}

fn validate_inputs(table: &PartitionTable) -> Result<(), EngineError> {
    if table.partition_count() == 0 {
        return Err(EngineError::InvalidInput(
            "the partition table declares no partitions".to_string(),
        ));
    }
    if table.taxon_count() < 3 {
        return Err(EngineError::InvalidInput(format!(
            "a tree search requires at least three taxa, got {}",
            table.taxon_count()
        )));
    }
    Ok(())
}

fn check_unit_headroom(
    table: &PartitionTable,
    unit_count: usize,
    force: bool,
) -> Result<(), EngineError> {
    let total: usize = table.workloads().iter().map(|&(_, size)| size).sum();
    let per_unit = total / unit_count;

    if per_unit < HARD_COLUMNS_PER_UNIT && !force {
        return Err(EngineError::InvalidInput(format!(
            "{per_unit} alignment columns per execution unit is below the workable \
             minimum of {HARD_COLUMNS_PER_UNIT}; use fewer threads or set force"
        )));
    }

    let soft = if unit_count < SMALL_GRID_UNITS {
        SOFT_COLUMNS_PER_UNIT * 3
    } else {
        SOFT_COLUMNS_PER_UNIT
    };
    if per_unit < soft {
        warn!(
            per_unit,
            recommended = soft,
            "Few alignment columns per execution unit; consider fewer threads"
        );
    }
    Ok(())
}

// Reduction slots per unit. Two per partition covers the widest per-partition
// task, and the floor keeps move scoring batches reasonably sized.
fn reduce_slots(partition_count: usize) -> usize {
    (2 * partition_count).max(128)
}

fn finalize_results(context: &SearchContext<'_>) -> Result<SearchOutcome, EngineError> {
    context.with_checkpoint(|manager| {
        let elapsed_secs = manager.elapsed_secs();
        let record = manager.record()?;
        let best = best_scored(&record.ml_results).ok_or_else(|| {
            EngineError::Internal("search finished without recording any tree".to_string())
        })?;
        Ok(SearchOutcome {
            best,
            ml_trees: record.ml_results.clone(),
            bootstrap_trees: record.bootstrap_results.clone(),
            elapsed_secs,
        })
    })
}

// Highest score wins; the earliest tree keeps exact ties.
fn best_scored(trees: &[ScoredTree]) -> Option<ScoredTree> {
    let mut best: Option<&ScoredTree> = None;
    for tree in trees {
        if best.map_or(true, |incumbent| tree.loglh > incumbent.loglh) {
            best = Some(tree);
        }
    }
    best.cloned()
}
