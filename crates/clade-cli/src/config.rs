use crate::cli::SearchArgs;
use crate::error::{CliError, Result};
use crate::utils::with_suffix;
use clademl::engine::config as core_config;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

const DEFAULT_SEED: u64 = 42;
const DEFAULT_START_TREES: usize = 10;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialSearchSection {
    seed: Option<u64>,
    trees: Option<usize>,
    bootstrap: Option<usize>,
    epsilon: Option<f64>,
    #[serde(rename = "spr-radius")]
    spr_radius: Option<usize>,
    #[serde(rename = "model-opt-cadence")]
    model_opt_cadence: Option<u32>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialExecutionSection {
    threads: Option<usize>,
    force: Option<bool>,
}

/// One `[[partition]]` block: a named alignment region given as a 1-based
/// inclusive column range, e.g. `range = "1-450"`.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialPartitionBlock {
    name: String,
    range: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialSearchConfig {
    search: Option<PartialSearchSection>,
    execution: Option<PartialExecutionSection>,
    #[serde(default, rename = "partition")]
    partitions: Vec<PartialPartitionBlock>,
}

impl PartialSearchConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Resolves the worker thread count with CLI precedence over the file,
    /// falling back to the number of available logical cores.
    pub fn resolved_threads(&self, cli_threads: Option<usize>) -> usize {
        cli_threads
            .or_else(|| self.execution.as_ref().and_then(|e| e.threads))
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    /// Converts the `[[partition]]` blocks to the half-open zero-based column
    /// spans the table builder expects. An empty list means one partition
    /// spanning the whole alignment.
    pub fn partition_spans(&self) -> Result<Vec<(String, usize, usize)>> {
        self.partitions
            .iter()
            .map(|block| {
                let (start, end) = parse_range(&block.range).map_err(|reason| {
                    CliError::Config(format!("partition '{}': {}", block.name, reason))
                })?;
                Ok((block.name.clone(), start, end))
            })
            .collect()
    }

    pub fn merge_with_cli(
        mut self,
        args: &SearchArgs,
        cli_threads: Option<usize>,
        prefix: &Path,
    ) -> Result<core_config::SearchConfig> {
        let threads = self.resolved_threads(cli_threads);
        let search = self.search.take().unwrap_or_default();
        let execution = self.execution.take().unwrap_or_default();

        let checkpoint_path = args
            .checkpoint
            .clone()
            .unwrap_or_else(|| with_suffix(prefix, ".ckp"));

        let mut builder = core_config::SearchConfigBuilder::new()
            .threads(threads)
            .force(args.force || execution.force.unwrap_or(false))
            .seed(args.seed.or(search.seed).unwrap_or(DEFAULT_SEED))
            .start_trees(args.trees.or(search.trees).unwrap_or(DEFAULT_START_TREES))
            .bootstrap_replicates(args.bootstrap.or(search.bootstrap).unwrap_or(0))
            .checkpoint_path(checkpoint_path)
            .resume(!args.redo);

        if let Some(epsilon) = args.epsilon.or(search.epsilon) {
            builder = builder.epsilon(epsilon);
        }
        if let Some(radius) = args.spr_radius.or(search.spr_radius) {
            builder = builder.spr_radius(radius);
        }
        if let Some(cadence) = search.model_opt_cadence {
            builder = builder.model_opt_cadence(cadence);
        }

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }
}

fn parse_range(text: &str) -> std::result::Result<(usize, usize), String> {
    let (lo, hi) = text
        .split_once('-')
        .ok_or_else(|| format!("range '{}' is not of the form 'start-end'", text))?;
    let start: usize = lo
        .trim()
        .parse()
        .map_err(|_| format!("range start '{}' is not a number", lo.trim()))?;
    let end: usize = hi
        .trim()
        .parse()
        .map_err(|_| format!("range end '{}' is not a number", hi.trim()))?;
    if start == 0 {
        return Err(format!(
            "range '{}' is 1-based, so column 0 does not exist",
            text
        ));
    }
    if end < start {
        return Err(format!("range '{}' ends before it starts", text));
    }
    Ok((start - 1, end))
}
