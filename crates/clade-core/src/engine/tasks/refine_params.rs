use crate::core::tree::topology::Topology;
use crate::engine::context::SearchContext;
use crate::engine::error::EngineError;
use crate::engine::kernel::PartitionModel;
use crate::engine::parallel::UnitContext;
use tracing::{debug, instrument};

const INV_PHI: f64 = 0.618_033_988_749_894_8;
// Fixed evaluation count per scalar, so every unit issues the same number of
// reduces regardless of how the likelihood surface looks.
const GOLDEN_STEPS: usize = 16;
const MAX_PASSES: usize = 3;

const BRANCH_MIN: f64 = 1e-6;
const BRANCH_MAX: f64 = 100.0;
const KAPPA_MIN: f64 = 0.1;
const KAPPA_MAX: f64 = 100.0;

/// Refines branch lengths, and model parameters when `optimize_models` is
/// set, in place; returns the resulting full-grid log-likelihood.
///
/// Scalars are searched on a log scale with a golden-section probe, sweeping
/// edges in canonical order. Sweeps repeat until a full pass gains less than
/// `epsilon` log-likelihood units. A probe that fails to beat the incumbent
/// score is rolled back rather than applied.
#[instrument(skip_all, name = "refine_params_task")]
pub fn run(
    context: &SearchContext<'_>,
    unit: &UnitContext<'_>,
    tree: &mut Topology,
    models: &mut [PartitionModel],
    optimize_models: bool,
    epsilon: f64,
) -> Result<f64, EngineError> {
    let mut best = super::grid_loglh(context, unit, tree, models)?;

    for _ in 0..MAX_PASSES {
        let before = best;

        for id in tree.branch_nodes() {
            let original = tree.branch(id);
            let (ln_length, score) =
                refine_scalar(BRANCH_MIN.ln(), BRANCH_MAX.ln(), |ln_length| {
                    tree.set_branch(id, ln_length.exp());
                    super::grid_loglh(context, unit, tree, models)
                })?;
            if score > best {
                best = score;
                tree.set_branch(id, ln_length.exp());
            } else {
                tree.set_branch(id, original);
            }
        }

        if optimize_models {
            for pid in 0..models.len() {
                let original = models[pid].kappa;
                let (ln_kappa, score) =
                    refine_scalar(KAPPA_MIN.ln(), KAPPA_MAX.ln(), |ln_kappa| {
                        models[pid].kappa = ln_kappa.exp();
                        super::grid_loglh(context, unit, tree, models)
                    })?;
                if score > best {
                    best = score;
                    models[pid].kappa = ln_kappa.exp();
                } else {
                    models[pid].kappa = original;
                }
            }
        }

        if best - before < epsilon {
            break;
        }
    }

    debug!(loglh = best, "Parameter refinement finished");
    Ok(best)
}

// Golden-section maximization of `eval` over [lo, hi].
fn refine_scalar<F>(lo: f64, hi: f64, mut eval: F) -> Result<(f64, f64), EngineError>
where
    F: FnMut(f64) -> Result<f64, EngineError>,
{
    let mut a = lo;
    let mut b = hi;
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = eval(c)?;
    let mut fd = eval(d)?;
    for _ in 0..GOLDEN_STEPS {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = eval(c)?;
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = eval(d)?;
        }
    }
    Ok(if fc > fd { (c, fc) } else { (d, fd) })
}
