use crate::core::balance::BalanceError;
use crate::core::tree::topology::TreeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reduction buffer exhausted: {needed} slots requested, {reserved} reserved")]
    ResourceExhaustion { needed: usize, reserved: usize },

    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    #[error("Checkpoint file '{path}' is unusable: {reason}", path = .path.display())]
    CheckpointCorruption { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution grid poisoned by a failed unit")]
    Poisoned,

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl From<BalanceError> for EngineError {
    fn from(err: BalanceError) -> Self {
        EngineError::InvalidInput(err.to_string())
    }
}

impl From<TreeError> for EngineError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::TooFewTaxa { .. } => EngineError::InvalidInput(err.to_string()),
            _ => EngineError::Internal(err.to_string()),
        }
    }
}
