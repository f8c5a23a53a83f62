use crate::cli::CheckArgs;
use crate::config::PartialSearchConfig;
use crate::error::{CliError, Result};
use clademl::{
    core::balance::LoadBalancer,
    core::io::fasta,
    engine::error::EngineError,
};
use tracing::info;

/// Parses the inputs and previews the per-unit column loads without
/// touching a checkpoint or starting a search.
pub fn run(args: CheckArgs, cli_threads: Option<usize>) -> Result<()> {
    let partial = PartialSearchConfig::load(args.config.as_deref())?;
    let spans = partial.partition_spans()?;
    let threads = partial.resolved_threads(cli_threads);

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

    println!(
        "✓ Alignment OK: {} taxa, {} columns in {} partition(s).",
        table.taxon_count(),
        table.total_columns(),
        table.partition_count()
    );
    for partition in table.partitions() {
        println!(
            "    {:<16} {:>8} columns",
            partition.name(),
            partition.length()
        );
    }

    let plan = LoadBalancer::new()
        .plan(&table.workloads(), threads)
        .map_err(EngineError::from)?;

    println!("✓ Work plan over {} execution unit(s):", plan.pool_size());
    for unit in 0..plan.pool_size() {
        println!(
            "    unit {:>3}: {:>8} columns in {} slice(s)",
            unit,
            plan.unit_load(unit),
            plan.items(unit).len()
        );
    }
    println!(
        "    worst unit carries {} columns against an even share of {}.",
        plan.max_load(),
        plan.total_load().div_ceil(plan.pool_size())
    );

    Ok(())
}
