//! Listing-Harvester main entry point
//!
//! This is the command-line interface for the listing harvester.

use anyhow::Context;
use clap::Parser;
use listing_harvester::config::{load_config_with_hash, Config};
use listing_harvester::output::{print_checkpoint, print_summary};
use listing_harvester::storage::{CheckpointStore, JsonCheckpointStore};
use listing_harvester::{Coordinator, HarvestError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Listing-Harvester: a resumable harvester for paginated listings
///
/// Walks a listing page by page, reads every new item's detail page on a
/// pool of sessions, and appends the records to CSV, TSV or SQLite. Progress
/// is checkpointed after every page, so an interrupted run resumes where it
/// stopped.
#[derive(Parser, Debug)]
#[command(name = "listing-harvester")]
#[command(version)]
#[command(about = "A resumable harvester for paginated listings", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Discard the checkpoint and the existing output before starting
    #[arg(long, conflicts_with_all = ["dry_run", "show_checkpoint"])]
    fresh: bool,

    /// Validate config and show what would be harvested without harvesting
    #[arg(long, conflicts_with = "show_checkpoint")]
    dry_run: bool,

    /// Print the saved checkpoint and exit
    #[arg(long, conflicts_with = "dry_run")]
    show_checkpoint: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, &config_hash);
        return Ok(());
    }
    if cli.show_checkpoint {
        return handle_show_checkpoint(&config);
    }
    if cli.fresh {
        handle_fresh(&config)?;
    }

    handle_harvest(config).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_harvester=info,warn"),
            1 => EnvFilter::new("listing_harvester=debug,info"),
            2 => EnvFilter::new("listing_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the resolved plan
fn handle_dry_run(config: &Config, config_hash: &str) {
    println!("=== Listing-Harvester Dry Run ===\n");

    println!("Target:");
    println!("  Listing URL: {}", config.listing_url());
    println!("  Ready selector: {}", config.target.ready_selector);
    println!("  Search fingerprint: {}", config.search_fingerprint());
    println!("  Config hash: {}", config_hash);

    println!("\nHarvest:");
    println!("  Pool size: {}", config.harvest.pool_size);
    println!("  Max pages: {}", config.harvest.max_pages);
    match config.harvest.item_limit {
        Some(limit) => println!("  Item limit: {}", limit),
        None => println!("  Item limit: none"),
    }
    println!("  Item timeout: {}ms", config.harvest.item_timeout_ms);
    println!("  Page load timeout: {}ms", config.harvest.page_load_timeout_ms);
    println!(
        "  Retry: {} attempts, {}ms initial delay, x{}",
        config.retry.max_attempts, config.retry.initial_delay_ms, config.retry.backoff_multiplier
    );

    println!("\nPagination ({}):", config.pagination.len());
    for strategy in &config.pagination {
        match &strategy.text {
            Some(text) => println!(
                "  - {}: {} [text '{}']",
                strategy.name, strategy.selector, text
            ),
            None => println!("  - {}: {}", strategy.name, strategy.selector),
        }
    }

    println!("\nExtractors ({}):", config.extractors.len());
    for extractor in &config.extractors {
        println!(
            "  - {}: {} ({} listing fields, {} detail fields)",
            extractor.name,
            extractor.item_selector,
            extractor.fields.len(),
            extractor.details.len()
        );
    }

    println!("\nOutput:");
    println!("  Path: {}", config.output.path.display());
    println!("  Format: {:?}", config.output.format);
    println!("  Columns: identity, {}", config.output.columns.join(", "));
    println!("  Checkpoint: {}", config.output.checkpoint_path.display());

    println!("\n✓ Configuration is valid");
}

/// Handles the --show-checkpoint mode
fn handle_show_checkpoint(config: &Config) -> anyhow::Result<()> {
    let store = JsonCheckpointStore::new(&config.output.checkpoint_path);
    println!("Checkpoint: {}\n", store.path().display());

    match store.read()? {
        Some(checkpoint) => {
            print_checkpoint(&checkpoint);
            if checkpoint.fingerprint.as_deref() != Some(config.search_fingerprint().as_str()) {
                println!("\n! Written for a different search; it will be ignored");
            }
        }
        None => println!("No checkpoint saved"),
    }
    Ok(())
}

/// Handles --fresh: removes saved progress
fn handle_fresh(config: &Config) -> anyhow::Result<()> {
    tracing::warn!("Starting fresh: discarding checkpoint and existing output");
    JsonCheckpointStore::new(&config.output.checkpoint_path).clear()?;

    match std::fs::remove_file(&config.output.path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| {
            format!("Failed to remove {}", config.output.path.display())
        }),
    }
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight work is released");
            trigger.cancel();
        }
    });

    let mut coordinator = Coordinator::from_config(Arc::new(config), cancel)?;
    let result = coordinator.run().await;

    println!();
    print_summary(coordinator.summary());

    match result {
        Ok(exit) => {
            tracing::info!("Harvest completed: {}", exit);
            Ok(())
        }
        Err(HarvestError::Cancelled) => {
            anyhow::bail!("Harvest cancelled; rerun to resume from the checkpoint")
        }
        Err(e) => Err(e).context("Harvest failed; rerun to resume from the checkpoint"),
    }
}
