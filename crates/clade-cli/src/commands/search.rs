use crate::cli::SearchArgs;
use crate::config::PartialSearchConfig;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use crate::utils::with_suffix;
use clademl::{
    core::alignment::partition::PartitionTable,
    core::io::fasta,
    engine::checkpoint::ScoredTree,
    engine::kernel::k80::K80Kernel,
    engine::progress::ProgressReporter,
    workflows,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub fn run(args: SearchArgs, cli_threads: Option<usize>) -> Result<()> {
    let partial = PartialSearchConfig::load(args.config.as_deref())?;
    let spans = partial.partition_spans()?;

    info!("Merging configuration from file and CLI arguments...");
    let prefix = output_prefix(&args);
    let config = partial.merge_with_cli(&args, cli_threads, &prefix)?;

    info!("Loading alignment from {:?}", &args.alignment);
    let (names, rows) =
        fasta::read_path(&args.alignment).map_err(|e| CliError::FileParsing {
            path: args.alignment.clone(),
            source: e.into(),
        })?;
    let table = fasta::build_table(names, rows, &spans).map_err(|e| CliError::FileParsing {
        path: args.alignment.clone(),
        source: e.into(),
    })?;
    info!(
        taxa = table.taxon_count(),
        partitions = table.partition_count(),
        columns = table.total_columns(),
        "Alignment loaded."
    );

    let kernel = K80Kernel::new(Arc::new(table.clone()));
    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Starting tree search...");
    info!("Invoking the core search workflow...");

    let outcome = workflows::search::run(&table, &config, &kernel, &reporter)?;

    info!(
        "Workflow finished, received {} maximum-likelihood tree(s).",
        outcome.ml_trees.len()
    );

    let best_path = with_suffix(&prefix, ".bestTree.nwk");
    write_trees(&best_path, std::slice::from_ref(&outcome.best), &table)?;
    println!(
        "✓ Best tree (logLH {:.4}) written to: {}",
        outcome.best.loglh,
        best_path.display()
    );

    let ml_path = with_suffix(&prefix, ".mlTrees.nwk");
    write_trees(&ml_path, &outcome.ml_trees, &table)?;
    println!(
        "  {} ML tree(s) written to: {}",
        outcome.ml_trees.len(),
        ml_path.display()
    );

    if !outcome.bootstrap_trees.is_empty() {
        let bootstrap_path = with_suffix(&prefix, ".bootstraps.nwk");
        write_trees(&bootstrap_path, &outcome.bootstrap_trees, &table)?;
        println!(
            "  {} bootstrap tree(s) written to: {}",
            outcome.bootstrap_trees.len(),
            bootstrap_path.display()
        );
    }

    println!(
        "  Total search time: {}s across all sessions.",
        outcome.elapsed_secs
    );

    Ok(())
}

fn output_prefix(args: &SearchArgs) -> PathBuf {
    args.prefix.clone().unwrap_or_else(|| args.alignment.clone())
}

fn write_trees(path: &Path, trees: &[ScoredTree], table: &PartitionTable) -> Result<()> {
    let mut text = String::new();
    for tree in trees {
        text.push_str(&tree.topology.to_newick(table.taxa()));
        text.push('\n');
    }
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use tempfile::tempdir;

    const TEST_FASTA: &str = "\
>alpha
ACGTACGTACGTACGT
>beta
ACGTACGTACGTACGA
>gamma
TGCATGCATGCATGCA
>delta
TGCATGCATGCATGCC
>epsilon
ACGTACGAACGTACGT
";

    fn parse_search(argv: &[&str]) -> (SearchArgs, Option<usize>) {
        let cli = Cli::parse_from(argv);
        match cli.command {
            Commands::Search(args) => (args, cli.threads),
            _ => panic!("Expected 'search' subcommand"),
        }
    }

    #[test]
    fn a_search_run_writes_the_expected_tree_files() {
        let dir = tempdir().unwrap();
        let aln_path = dir.path().join("toy.fasta");
        fs::write(&aln_path, TEST_FASTA).unwrap();
        let prefix = dir.path().join("toy");

        let (args, cli_threads) = parse_search(&[
            "clade",
            "search",
            "-a",
            aln_path.to_str().unwrap(),
            "-o",
            prefix.to_str().unwrap(),
            "--seed",
            "11",
            "-t",
            "1",
            "--epsilon",
            "0.01",
            "--force",
            "-j",
            "1",
        ]);

        run(args, cli_threads).unwrap();

        let best = fs::read_to_string(with_suffix(&prefix, ".bestTree.nwk")).unwrap();
        assert!(best.trim_end().ends_with(';'));
        assert!(best.contains("alpha"));

        let ml = fs::read_to_string(with_suffix(&prefix, ".mlTrees.nwk")).unwrap();
        assert_eq!(ml.lines().count(), 1);

        assert!(!with_suffix(&prefix, ".bootstraps.nwk").exists());
        assert!(!with_suffix(&prefix, ".ckp").exists());
    }

    #[test]
    fn missing_alignments_surface_as_parse_errors() {
        let dir = tempdir().unwrap();
        let (args, cli_threads) = parse_search(&[
            "clade",
            "search",
            "-a",
            dir.path().join("absent.fasta").to_str().unwrap(),
        ]);

        let result = run(args, cli_threads);
        assert!(matches!(result, Err(CliError::FileParsing { .. })));
    }
}
