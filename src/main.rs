//! vid-harvest main entry point
//!
//! Command-line operator surface over discovery, processing and the asset store.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use vid_harvest::config::{load_config_with_hash, relay_credentials, Config};
use vid_harvest::crawler::{discover_and_seed, seed_from_file, DiscoveryStrategy};
use vid_harvest::pipeline::Pipeline;
use vid_harvest::state::AssetStatus;
use vid_harvest::storage::{
    lock_storage, open_shared_storage, AssetStore, SharedStorage, StorageError,
    DEFAULT_PURGE_PATTERNS,
};
use vid_harvest::HarvestError;
use tracing_subscriber::EnvFilter;

/// vid-harvest: discover media pages and relay them to a hosting library
///
/// Discovery crawls a site for asset pages and seeds them into the store.
/// Processing resolves each page to its media, fetches it and uploads it,
/// recording every stage so that interrupted batches can be resumed.
#[derive(Parser, Debug)]
#[command(name = "vid-harvest")]
#[command(version)]
#[command(about = "Discover, extract and relay media assets", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl a site and seed discovered asset pages as PENDING
    Discover {
        /// Homepage, listing or category URL to start from
        seed: String,

        /// auto, sitemap, paginated or frontier
        #[arg(long, default_value = "auto")]
        strategy: DiscoveryStrategy,

        /// Page budget (defaults to discovery.default-page-budget)
        #[arg(long)]
        pages: Option<u32>,

        /// First listing page for the paginated sweep
        #[arg(long)]
        start_page: Option<u32>,
    },

    /// Seed asset URLs from a file, one per line
    Seed {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Process every PENDING and FAILED asset
    Process {
        /// Worker count (defaults to pipeline.workers, capped at pipeline.max-workers)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show asset counts per status
    Stats,

    /// Reset assets left in-flight by a crashed run to PENDING
    ResetStale,

    /// Delete FAILED assets whose error matches a pattern
    PurgeFailed {
        /// Substring of the stored error; repeatable (defaults to known dead-end errors)
        #[arg(long = "pattern")]
        patterns: Vec<String>,
    },

    /// Validate config and show the effective settings
    DryRun,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::DryRun => handle_dry_run(&config),
        Command::Discover {
            seed,
            strategy,
            pages,
            start_page,
        } => {
            let storage = open_store(&config)?;
            let stats =
                discover_and_seed(&storage, &config, &seed, strategy, pages, start_page).await?;
            println!("Pages scanned: {}", stats.pages_scanned);
            println!("Links found:   {}", stats.links_found);
            println!("Links added:   {}", stats.links_added);
            Ok(())
        }
        Command::Seed { file } => {
            let storage = open_store(&config)?;
            let added = seed_from_file(&storage, &file)
                .with_context(|| format!("Failed to seed from {}", file.display()))?;
            println!("Seeded {} new URLs", added);
            Ok(())
        }
        Command::Process { workers } => {
            let storage = open_store(&config)?;
            handle_process(&config, &config_hash, storage, workers).await
        }
        Command::Stats => {
            let storage = open_store(&config)?;
            print_stats(&storage)
        }
        Command::ResetStale => {
            let storage = open_store(&config)?;
            let reset = lock_storage(&storage).reset_stale()?;
            println!("Reset {} stale assets to PENDING", reset);
            Ok(())
        }
        Command::PurgeFailed { patterns } => {
            let storage = open_store(&config)?;
            let patterns = if patterns.is_empty() {
                DEFAULT_PURGE_PATTERNS.iter().map(|p| p.to_string()).collect()
            } else {
                patterns
            };
            let purged = lock_storage(&storage).purge_failed(&patterns)?;
            println!("Purged {} failed assets", purged);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("vid_harvest=info,warn"),
            1 => EnvFilter::new("vid_harvest=debug,info"),
            2 => EnvFilter::new("vid_harvest=trace,debug"),
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

fn open_store(config: &Config) -> anyhow::Result<SharedStorage> {
    let path = Path::new(&config.store.database_path);
    open_shared_storage(path)
        .with_context(|| format!("Failed to open asset store at {}", path.display()))
}

async fn handle_process(
    config: &Config,
    config_hash: &str,
    storage: SharedStorage,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(config, config_hash, storage.clone())
        .context("Failed to initialize the processing pipeline")?;

    let workers = workers.unwrap_or(config.pipeline.workers);
    let handle = pipeline.spawn(workers);

    let stats = match handle.await.context("Processing task aborted")? {
        Ok(stats) => stats,
        Err(HarvestError::Persistence(StorageError::BatchInProgress(id))) => anyhow::bail!(
            "Batch {} is still marked running. If no other vid-harvest process is using \
             this store, run `reset-stale` to recover it",
            id
        ),
        Err(e) => return Err(e.into()),
    };

    println!("Completed: {}", stats.completed_count);
    println!("Failed:    {}", stats.failed_count);
    print_stats(&storage)
}

fn print_stats(storage: &SharedStorage) -> anyhow::Result<()> {
    let (counts, total) = {
        let storage = lock_storage(storage);
        (storage.status_counts()?, storage.total_count()?)
    };

    println!("=== Asset Status ===");
    for status in AssetStatus::all_statuses() {
        println!(
            "  {:<12} {}",
            status.to_string(),
            counts.get(&status).copied().unwrap_or(0)
        );
    }
    println!("  {:<12} {}", "TOTAL", total);
    Ok(())
}

/// Handles the dry-run command: validates config and shows the effective settings
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== vid-harvest Dry Run ===\n");

    println!("Store:");
    println!("  Database: {}", config.store.database_path);
    println!(
        "  Proxy: {}",
        config.proxy.as_deref().unwrap_or("(none)")
    );

    println!("\nDiscovery:");
    println!(
        "  Delay: {}-{}ms",
        config.discovery.delay_min_ms, config.discovery.delay_max_ms
    );
    println!("  Default page budget: {}", config.discovery.default_page_budget);
    println!("  User agents: {}", config.discovery.user_agents.len());
    println!("  Sitemap paths: {}", config.discovery.sitemap_paths.join(", "));

    println!("\nPipeline:");
    println!(
        "  Workers: {} (max {})",
        config.pipeline.workers, config.pipeline.max_workers
    );
    println!("  Min free disk: {}MB", config.pipeline.min_free_disk_mb);
    println!("  Temp dir: {}", config.pipeline.temp_dir);
    println!("  yt-dlp: {}", config.fetch.yt_dlp_path);

    println!("\nExtraction:");
    println!(
        "  Payload-decode domains ({}): {}",
        config.extraction.payload_decode_domains.len(),
        config.extraction.payload_decode_domains.join(", ")
    );
    println!(
        "  Browser domains ({}): {}",
        config.extraction.browser_domains.len(),
        config.extraction.browser_domains.join(", ")
    );
    println!(
        "  Browser: {} (headless: {}, hard timeout {}s)",
        if config.extraction.browser_enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.extraction.browser_headless,
        config.extraction.hard_timeout_secs
    );

    println!("\nRelay:");
    println!("  Base URL: {}", config.relay.base_url);
    match relay_credentials(&config.relay) {
        Ok((_, library_id)) => println!("  Library: {} (credentials present)", library_id),
        Err(e) => println!("  ! {} (processing will refuse to start)", e),
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}
