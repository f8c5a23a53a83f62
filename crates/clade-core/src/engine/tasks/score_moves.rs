use crate::core::tree::topology::{SprMove, Topology};
use crate::engine::context::SearchContext;
use crate::engine::error::EngineError;
use crate::engine::kernel::PartitionModel;
use crate::engine::parallel::UnitContext;
use tracing::{debug, instrument};

/// Scores every prune-and-regraft candidate within `radius` and returns the
/// best move with its full-grid log-likelihood, or `None` when the tree
/// offers no candidates.
///
/// Candidates are enumerated in canonical order on each unit, so index `i`
/// names the same logical move everywhere even when node arenas differ.
/// Ties keep the earliest candidate, which makes the winner deterministic.
#[instrument(skip_all, name = "score_moves_task")]
pub fn run(
    context: &SearchContext<'_>,
    unit: &UnitContext<'_>,
    tree: &Topology,
    models: &[PartitionModel],
    radius: usize,
) -> Result<Option<(SprMove, f64)>, EngineError> {
    let candidates = tree.spr_candidates(radius);
    if candidates.is_empty() {
        return Ok(None);
    }

    // Chunked by the reduce capacity; the shared candidate order lines the
    // chunk boundaries up across units without further coordination.
    let chunk = unit.reduce_capacity().max(1);
    let mut best: Option<(usize, f64)> = None;
    let mut scores: Vec<f64> = Vec::with_capacity(chunk.min(candidates.len()));

    for (chunk_index, batch) in candidates.chunks(chunk).enumerate() {
        scores.clear();
        for mv in batch {
            let mut candidate = tree.clone();
            candidate.apply_spr(mv)?;
            scores.push(super::local_loglh(context, unit, &candidate, models)?);
        }
        unit.reduce(&mut scores)?;

        for (offset, &loglh) in scores.iter().enumerate() {
            if best.map_or(true, |(_, incumbent)| loglh > incumbent) {
                best = Some((chunk_index * chunk + offset, loglh));
            }
        }
    }

    debug!(
        candidates = candidates.len(),
        best_loglh = best.map(|(_, loglh)| loglh),
        "Scored regraft candidates"
    );
    Ok(best.map(|(index, loglh)| (candidates[index], loglh)))
}
