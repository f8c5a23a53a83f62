//! Likelihood evaluation over alignment slices.
//!
//! Kernels score a [`WorkItem`] worth of columns against a tree and the
//! per-partition model parameters, returning a partial log-likelihood that
//! the grid sums into the full score. Evaluation is pure: kernels hold no
//! tree-dependent caches, so units may score arbitrary candidate topologies
//! without invalidation protocols.

pub mod k80;

use crate::core::plan::WorkItem;
use crate::core::tree::topology::Topology;
use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_KAPPA: f64 = 4.0;

/// Substitution model parameters of a single partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionModel {
    /// Transition/transversion rate ratio.
    pub kappa: f64,
}

impl Default for PartitionModel {
    fn default() -> Self {
        Self {
            kappa: DEFAULT_KAPPA,
        }
    }
}

pub trait LikelihoodKernel: Send + Sync {
    /// Log-likelihood contribution of `item`'s columns, weighted per column.
    ///
    /// `weights` is the full weight row of the item's partition; columns with
    /// zero weight contribute nothing. Fails with
    /// [`EngineError::NumericalFailure`] when any site likelihood underflows
    /// to a non-positive or non-finite value.
    fn partial_loglh(
        &self,
        tree: &Topology,
        models: &[PartitionModel],
        item: &WorkItem,
        weights: &[u32],
    ) -> Result<f64, EngineError>;
}
