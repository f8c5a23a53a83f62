use super::{LikelihoodKernel, PartitionModel};
use crate::core::alignment::encoding::{self, STATE_COUNT};
use crate::core::alignment::partition::PartitionTable;
use crate::core::plan::WorkItem;
use crate::core::tree::topology::{NodeId, Topology};
use crate::engine::error::EngineError;
use slotmap::SecondaryMap;
use std::sync::Arc;

// States are ordered A, C, G, T; transitions pair A<->G and C<->T.
const TS_PARTNER: [usize; STATE_COUNT] = [2, 3, 0, 1];

/// Kimura two-parameter likelihoods via postorder pruning.
///
/// Conditional likelihood vectors are recomputed per call, so the kernel is
/// stateless with respect to the tree and safe to share across units.
pub struct K80Kernel {
    table: Arc<PartitionTable>,
}

impl K80Kernel {
    pub fn new(table: Arc<PartitionTable>) -> Self {
        Self { table }
    }
}

// Closed-form K80 transition probabilities along one edge, grouped as
// [identical, transition, transversion].
fn transition_probs(branch: f64, kappa: f64) -> [f64; 3] {
    let beta = 1.0 / (kappa + 2.0);
    let alpha = kappa * beta;
    let e4 = (-4.0 * beta * branch).exp();
    let e2 = (-2.0 * (alpha + beta) * branch).exp();
    [
        0.25 + 0.25 * e4 + 0.5 * e2,
        0.25 + 0.25 * e4 - 0.5 * e2,
        0.25 - 0.25 * e4,
    ]
}

#[inline]
fn prob(probs: &[f64; 3], from: usize, to: usize) -> f64 {
    if from == to {
        probs[0]
    } else if TS_PARTNER[from] == to {
        probs[1]
    } else {
        probs[2]
    }
}

impl LikelihoodKernel for K80Kernel {
    fn partial_loglh(
        &self,
        tree: &Topology,
        models: &[PartitionModel],
        item: &WorkItem,
        weights: &[u32],
    ) -> Result<f64, EngineError> {
        let partition = self.table.partition(item.partition_id).ok_or_else(|| {
            EngineError::Internal(format!(
                "work item references unknown partition {}",
                item.partition_id
            ))
        })?;
        let model = models.get(item.partition_id).ok_or_else(|| {
            EngineError::Internal(format!(
                "no model parameters for partition {}",
                item.partition_id
            ))
        })?;

        let order = tree.postorder();
        let mut probs: SecondaryMap<NodeId, [f64; 3]> = SecondaryMap::new();
        for &id in &order {
            if id != tree.root() {
                probs.insert(id, transition_probs(tree.branch(id), model.kappa));
            }
        }

        let mut clvs: SecondaryMap<NodeId, [f64; STATE_COUNT]> = SecondaryMap::new();
        let mut total = 0.0;
        for column in item.start..item.end() {
            let weight = weights[column];
            if weight == 0 {
                continue;
            }
            for &id in &order {
                let node = tree.node(id);
                let clv = match node.tip() {
                    Some(taxon) => {
                        let mask = partition.state(taxon, column);
                        if encoding::is_gap(mask) {
                            [1.0; STATE_COUNT]
                        } else {
                            let mut clv = [0.0; STATE_COUNT];
                            for (state, value) in clv.iter_mut().enumerate() {
                                if mask & (1 << state) != 0 {
                                    *value = 1.0;
                                }
                            }
                            clv
                        }
                    }
                    None => {
                        let mut clv = [1.0; STATE_COUNT];
                        for &child in node.children() {
                            let child_probs = &probs[child];
                            let child_clv = &clvs[child];
                            for (state, value) in clv.iter_mut().enumerate() {
                                let mut sum = 0.0;
                                for (to, &partial) in child_clv.iter().enumerate() {
                                    sum += prob(child_probs, state, to) * partial;
                                }
                                *value *= sum;
                            }
                        }
                        clv
                    }
                };
                clvs.insert(id, clv);
            }

            let site: f64 = clvs[tree.root()].iter().sum::<f64>() * 0.25;
            if !site.is_finite() || site <= 0.0 {
                return Err(EngineError::NumericalFailure(format!(
                    "site likelihood {site} at partition {} column {column}",
                    item.partition_id
                )));
            }
            total += site.ln() * f64::from(weight);
        }
        Ok(total)
    }
}
