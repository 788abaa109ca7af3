//! Tally - count query keys into an on-disk index and export the totals

mod reader;

use anyhow::{Context, Result};
use clap::Parser;
use reader::QueryReader;
use std::path::PathBuf;
use tally_core::btree::{export_to_path, BTree, ExportOrder};
use tally_core::config::{DEFAULT_CACHE_CAPACITY, DEFAULT_WORKERS, QUEUE_CAPACITY};
use tally_core::pipeline::{PipelineConfig, QueryCounter};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command line configuration
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tally",
    about = "Count query keys through an LRU cache into a disk B-tree",
    version
)]
struct Cli {
    /// Query file, one key per line (`-` for stdin)
    #[arg(long, env = "TALLY_INPUT", default_value = "./queries.txt")]
    input: PathBuf,

    /// Where the `key<TAB>count` export is written
    #[arg(long, env = "TALLY_OUTPUT", default_value = "./result.txt")]
    output: PathBuf,

    /// Keys held in the aggregation cache
    #[arg(long, env = "TALLY_CACHE_SIZE", default_value_t = DEFAULT_CACHE_CAPACITY)]
    cache_size: usize,

    /// Index file backing the B-tree
    #[arg(long, env = "TALLY_INDEXES", default_value = "./indexes")]
    indexes: PathBuf,

    /// Number of counting threads
    #[arg(long, env = "TALLY_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Export keys in sorted order instead of level order
    #[arg(long)]
    sorted: bool,

    /// Delete the index file after a successful export
    #[arg(long)]
    discard_index: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    info!("Counting {:?} into {:?}", cli.input, cli.indexes);

    let config = PipelineConfig {
        cache_capacity: cli.cache_size,
        workers: cli.workers,
        queue_capacity: QUEUE_CAPACITY,
    };
    config.validate()?;

    let reader = QueryReader::open(&cli.input)?;
    let tree = BTree::open(&cli.indexes)
        .with_context(|| format!("failed to open index {}", cli.indexes.display()))?;
    let counter = QueryCounter::start(tree, config)?;

    let fed = reader.run(|key| counter.send(key).map_err(Into::into));
    // finish even when feeding failed: it reports why the pipeline closed
    let (mut tree, report) = counter.finish().context("aggregation failed")?;
    let lines = fed?;

    for pair in &report.rejected {
        warn!(
            "Key of {} bytes was too long to store ({} occurrences)",
            pair.key.len(),
            pair.value
        );
    }
    info!(
        "Read {} lines: {} inserts, {} updates, {} rejected keys",
        lines,
        report.inserts,
        report.updates,
        report.rejected.len()
    );

    let order = if cli.sorted {
        ExportOrder::Sorted
    } else {
        ExportOrder::LevelOrder
    };
    export_to_path(&mut tree, &cli.output, order)
        .with_context(|| format!("failed to export to {}", cli.output.display()))?;

    let stats = tree.stats()?;
    info!(
        "Index holds {} keys in {} nodes, height {}, {} blocks",
        stats.pairs, stats.nodes, stats.height, stats.blocks
    );

    if cli.discard_index {
        tree.destroy()?;
    } else {
        tree.close()?;
    }
    Ok(())
}
