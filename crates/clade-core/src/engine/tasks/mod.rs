//! Collective tasks executed in lockstep by the execution grid.
//!
//! Each task's `run` is entered by every unit with identical arguments; units
//! diverge only in the plan slices they score locally. All decisions inside a
//! task are made on reduced values, which keeps control flow identical on
//! every unit without further coordination.

pub mod refine_params;
pub mod score_moves;

use crate::core::tree::topology::Topology;
use crate::engine::context::SearchContext;
use crate::engine::error::EngineError;
use crate::engine::kernel::PartitionModel;
use crate::engine::parallel::UnitContext;

/// Full log-likelihood of `tree` over the whole grid.
pub fn grid_loglh(
    context: &SearchContext<'_>,
    unit: &UnitContext<'_>,
    tree: &Topology,
    models: &[PartitionModel],
) -> Result<f64, EngineError> {
    let mut acc = [local_loglh(context, unit, tree, models)?];
    unit.reduce(&mut acc)?;
    Ok(acc[0])
}

/// Log-likelihood of this unit's plan slices only.
pub fn local_loglh(
    context: &SearchContext<'_>,
    unit: &UnitContext<'_>,
    tree: &Topology,
    models: &[PartitionModel],
) -> Result<f64, EngineError> {
    let plan = context.plan()?;
    let weights = context.weights()?;
    let mut total = 0.0;
    for item in plan.items(unit.unit_id()) {
        total += context
            .kernel
            .partial_loglh(tree, models, item, &weights[item.partition_id])?;
    }
    Ok(total)
}
