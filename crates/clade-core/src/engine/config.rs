use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_EPSILON: f64 = 0.1;
pub const DEFAULT_SPR_RADIUS: usize = 5;
pub const DEFAULT_MODEL_OPT_CADENCE: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub threads: usize,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub seed: u64,
    pub start_trees: usize,
    pub bootstrap_replicates: usize,
    pub epsilon: f64,
    pub spr_radius: usize,
    pub model_opt_cadence: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    pub resume: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub execution: ExecutionConfig,
    pub search: SearchParams,
    pub checkpoint: CheckpointConfig,
}

#[derive(Default)]
pub struct SearchConfigBuilder {
    threads: Option<usize>,
    force: bool,
    seed: Option<u64>,
    start_trees: Option<usize>,
    bootstrap_replicates: Option<usize>,
    epsilon: Option<f64>,
    spr_radius: Option<usize>,
    model_opt_cadence: Option<u32>,
    checkpoint_path: Option<PathBuf>,
    resume: Option<bool>,
}

impl SearchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn start_trees(mut self, count: usize) -> Self {
        self.start_trees = Some(count);
        self
    }
    pub fn bootstrap_replicates(mut self, count: usize) -> Self {
        self.bootstrap_replicates = Some(count);
        self
    }
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }
    pub fn spr_radius(mut self, radius: usize) -> Self {
        self.spr_radius = Some(radius);
        self
    }
    pub fn model_opt_cadence(mut self, cadence: u32) -> Self {
        self.model_opt_cadence = Some(cadence);
        self
    }
    pub fn checkpoint_path(mut self, path: PathBuf) -> Self {
        self.checkpoint_path = Some(path);
        self
    }
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = Some(resume);
        self
    }

    pub fn build(self) -> Result<SearchConfig, ConfigError> {
        let threads = self.threads.ok_or(ConfigError::MissingParameter("threads"))?;
        if threads == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "threads",
                reason: "at least one execution thread is required".to_string(),
            });
        }
        let start_trees = self
            .start_trees
            .ok_or(ConfigError::MissingParameter("start_trees"))?;
        if start_trees == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "start_trees",
                reason: "at least one starting tree is required".to_string(),
            });
        }
        let epsilon = self.epsilon.unwrap_or(DEFAULT_EPSILON);
        if !(epsilon > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "epsilon",
                reason: format!("must be positive, got {epsilon}"),
            });
        }
        let spr_radius = self.spr_radius.unwrap_or(DEFAULT_SPR_RADIUS);
        if spr_radius == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "spr_radius",
                reason: "regraft radius must be at least one edge".to_string(),
            });
        }
        let model_opt_cadence = self.model_opt_cadence.unwrap_or(DEFAULT_MODEL_OPT_CADENCE);
        if model_opt_cadence == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "model_opt_cadence",
                reason: "cadence must be at least one round".to_string(),
            });
        }

        Ok(SearchConfig {
            execution: ExecutionConfig {
                threads,
                force: self.force,
            },
            search: SearchParams {
                seed: self.seed.ok_or(ConfigError::MissingParameter("seed"))?,
                start_trees,
                bootstrap_replicates: self.bootstrap_replicates.unwrap_or(0),
                epsilon,
                spr_radius,
                model_opt_cadence,
            },
            checkpoint: CheckpointConfig {
                path: self
                    .checkpoint_path
                    .ok_or(ConfigError::MissingParameter("checkpoint_path"))?,
                resume: self.resume.unwrap_or(true),
            },
        })
    }
}
