use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "CladeML CLI - A command-line interface for CladeML, a parallel maximum-likelihood phylogenetic tree inference engine with crash-safe checkpointing.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of worker threads for the execution grid.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a maximum-likelihood tree search, optionally with bootstrap replicates.
    Search(SearchArgs),
    /// Validate the inputs and preview the work distribution without searching.
    Check(CheckArgs),
}

/// Arguments for the `search` subcommand.
#[derive(Args, Debug)]
pub struct SearchArgs {
    // --- Core Arguments ---
    /// Path to the input alignment in FASTA format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub alignment: PathBuf,

    /// Path to the configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Prefix for all output files.
    /// Defaults to the alignment path, so `aln.fasta` yields `aln.fasta.bestTree.nwk`.
    #[arg(short = 'o', long, value_name = "PREFIX")]
    pub prefix: Option<PathBuf>,

    // --- Search Overrides ---
    /// Override the random seed from the config file.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Override the number of random starting trees.
    #[arg(short = 't', long, value_name = "INT")]
    pub trees: Option<usize>,

    /// Override the number of bootstrap replicates.
    #[arg(short = 'b', long, value_name = "INT")]
    pub bootstrap: Option<usize>,

    /// Override the log-likelihood improvement threshold for accepting a move.
    #[arg(long, value_name = "FLOAT")]
    pub epsilon: Option<f64>,

    /// Override the subtree regraft radius of the first search round.
    #[arg(long, value_name = "INT")]
    pub spr_radius: Option<usize>,

    // --- Run Control ---
    /// Override the checkpoint file location.
    /// Defaults to the output prefix with a `.ckp` suffix.
    #[arg(long, value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,

    /// Ignore an existing checkpoint and restart the analysis from scratch.
    #[arg(long)]
    pub redo: bool,

    /// Proceed even when the alignment is too thin for the execution grid.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to the input alignment in FASTA format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub alignment: PathBuf,

    /// Path to the configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
