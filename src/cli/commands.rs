//! CLI command definitions for keyword_relay.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::dispatch::DispatchService;
use crate::importer::{BulkImporter, UploadedFile};
use crate::metrics::init_metrics;
use crate::queue::{build_queue, FastQueue, QueueBackend};
use crate::scheduler::{PeriodicRefill, RefillScheduler};
use crate::server::{self, AppState};
use crate::storage::{KeywordStore, StoreStats};

/// Keyword distribution service: import, refill, dispatch.
#[derive(Parser)]
#[command(name = "keyword-relay")]
#[command(about = "Distribute keywords to pollers from a durable store through a fast queue tier")]
#[command(version)]
#[command(
    long_about = "keyword-relay imports keyword spreadsheets into SQLite, refills a Redis \
        list from the unread rows, and serves one keyword per request.\n\n\
        Example usage:\n  \
        keyword-relay import ./keywords.xlsx\n  \
        keyword-relay refill --batch-size 1000 --batches 10\n  \
        keyword-relay serve --listen 0.0.0.0:8080"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file. Environment variables override it.
    #[arg(short, long, global = true, env = "KEYWORD_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the configured fast-tier backend.
    #[arg(long, value_enum, global = true)]
    pub queue: Option<QueueBackend>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Serve keywords over HTTP.
    Serve(ServeArgs),

    /// Replace all keywords with the contents of a spreadsheet.
    Import(ImportArgs),

    /// Clear the fast tier and refill it from unread keywords.
    Refill(RefillArgs),

    /// Dispatch a single keyword.
    Next(OutputArgs),

    /// Apply database migrations.
    Migrate,

    /// Show store and fast-tier counts.
    Stats(OutputArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides the configured listen_addr).
    #[arg(long)]
    pub listen: Option<String>,

    /// Also run refills in-process every refill_interval.
    #[arg(long)]
    pub periodic_refill: bool,
}

#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Spreadsheet to import (.xlsx, .xls or .csv).
    pub file: PathBuf,

    /// Original file name, when `file` is a temporary upload path.
    #[arg(long)]
    pub name: Option<String>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct RefillArgs {
    /// Rows per batch (overrides refill_batch_size).
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum batches (overrides refill_batches).
    #[arg(long)]
    pub batches: Option<usize>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config =
        RelayConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(backend) = cli.queue {
        config = config.with_queue_backend(backend);
    }

    match cli.command {
        Commands::Serve(args) => run_serve_command(config, args).await,
        Commands::Import(args) => run_import_command(config, args).await,
        Commands::Refill(args) => run_refill_command(config, args).await,
        Commands::Next(args) => run_next_command(config, args).await,
        Commands::Migrate => run_migrate_command(config).await,
        Commands::Stats(args) => run_stats_command(config, args).await,
    }
}

async fn open_store(config: &RelayConfig) -> anyhow::Result<KeywordStore> {
    let store = KeywordStore::connect(&config.database_url, &config.store_options())
        .await
        .with_context(|| format!("Failed to open keyword store at {}", config.database_url))?;
    store
        .run_migrations()
        .await
        .context("Failed to apply migrations")?;
    Ok(store)
}

fn open_queue(config: &RelayConfig) -> anyhow::Result<Arc<dyn FastQueue>> {
    build_queue(
        config.queue_backend,
        &config.redis_url,
        &config.queue_key,
        config.queue_op_timeout,
    )
    .context("Failed to configure fast queue tier")
}

/// Opens the fast tier for a one-shot command that marks rows read.
///
/// The memory backend lives only as long as this process, so anything it
/// buffered would be marked read and then lost on exit.
fn open_shared_queue(config: &RelayConfig, command: &str) -> anyhow::Result<Arc<dyn FastQueue>> {
    if config.queue_backend == QueueBackend::Memory {
        anyhow::bail!(
            "`{}` needs a shared fast tier; the memory backend is only usable with `serve`",
            command
        );
    }
    open_queue(config)
}

fn dispatch_service(
    config: &RelayConfig,
    store: KeywordStore,
    queue: Arc<dyn FastQueue>,
) -> DispatchService {
    DispatchService::new(store, queue)
        .with_batch_size(config.dispatch_batch_size)
        .with_claim_attempts(config.dispatch_claim_attempts)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn run_serve_command(config: RelayConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    let store = open_store(&config).await?;
    let queue = open_queue(&config)?;
    let dispatch = dispatch_service(&config, store.clone(), Arc::clone(&queue));

    let mut periodic = if args.periodic_refill {
        let scheduler = RefillScheduler::new(store.clone(), Arc::clone(&queue))
            .with_dedupe(config.refill_dedupe);
        let mut periodic = PeriodicRefill::new(
            Arc::new(scheduler),
            config.refill_interval,
            config.refill_batch_size,
            config.refill_batches,
        );
        periodic.start()?;
        Some(periodic)
    } else {
        None
    };

    let listen = args.listen.unwrap_or_else(|| config.listen_addr.clone());
    let state = AppState::new(dispatch, store, queue);

    server::serve(state, &listen, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
    })
    .await
    .with_context(|| format!("HTTP server on {} failed", listen))?;

    if let Some(periodic) = periodic.as_mut() {
        periodic.shutdown().await?;
    }

    Ok(())
}

async fn run_import_command(config: RelayConfig, args: ImportArgs) -> anyhow::Result<()> {
    let upload = match args.name {
        Some(name) => UploadedFile::new(&args.file, name),
        None => UploadedFile::from_path(&args.file),
    };

    let store = open_store(&config).await?;
    let importer = BulkImporter::new(store, config.import_workers);
    let report = importer
        .import(&upload)
        .await
        .with_context(|| format!("Import of {} failed", display_name(&args.file)))?;

    if args.json {
        print_json(&report)?;
    } else {
        println!(
            "Imported {} keywords from {} ({} rows replaced)",
            report.total_inserted(),
            report.file,
            report.truncated
        );
        for sheet in &report.sheets {
            match &sheet.error {
                None => println!("  {:<32} {:>8}", sheet.sheet, sheet.inserted),
                Some(e) => println!("  {:<32}   FAILED: {}", sheet.sheet, e),
            }
        }
    }

    let failed = report.failed_sheets().count();
    if failed > 0 {
        anyhow::bail!("{} of {} sheets failed to import", failed, report.sheets.len());
    }
    Ok(())
}

async fn run_refill_command(config: RelayConfig, args: RefillArgs) -> anyhow::Result<()> {
    let batch_size = args.batch_size.unwrap_or(config.refill_batch_size);
    let batches = args.batches.unwrap_or(config.refill_batches);

    let queue = open_shared_queue(&config, "refill")?;
    let store = open_store(&config).await?;
    let scheduler = RefillScheduler::new(store, queue).with_dedupe(config.refill_dedupe);

    let report = scheduler.refill(batch_size, batches).await?;

    if args.json {
        print_json(&report)?;
    } else {
        println!(
            "Refilled {} keywords in {} batches \
             ({} fetched, {} marked read, {} duplicates skipped)",
            report.pushed,
            report.batches,
            report.fetched,
            report.marked,
            report.duplicates
        );
    }
    Ok(())
}

async fn run_next_command(config: RelayConfig, args: OutputArgs) -> anyhow::Result<()> {
    let queue = open_shared_queue(&config, "next")?;
    let store = open_store(&config).await?;
    let outcome = dispatch_service(&config, store, queue).next().await?;

    match (outcome, args.json) {
        (outcome, true) => print_json(&outcome)?,
        (Some(outcome), false) => println!("{}", outcome.keyword),
        (None, false) => println!("No keyword available"),
    }
    Ok(())
}

async fn run_migrate_command(config: RelayConfig) -> anyhow::Result<()> {
    let store = KeywordStore::connect(&config.database_url, &config.store_options()).await?;
    let applied = store.run_migrations().await?;
    println!("Applied {} migration(s) to {}", applied, config.database_url);
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    #[serde(flatten)]
    store: StoreStats,
    by_type: Vec<TypeCount>,
    queue_backend: &'static str,
    queue_depth: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TypeCount {
    #[serde(rename = "type")]
    kind: String,
    count: u64,
}

async fn run_stats_command(config: RelayConfig, args: OutputArgs) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let queue = open_queue(&config)?;

    let queue_depth = match queue.len().await {
        Ok(depth) => Some(depth),
        Err(e) => {
            warn!(error = %e, "Fast tier unavailable");
            None
        }
    };

    let output = StatsOutput {
        store: store.stats().await?,
        by_type: store
            .count_by_type()
            .await?
            .into_iter()
            .map(|(kind, count)| TypeCount { kind, count })
            .collect(),
        queue_backend: queue.backend(),
        queue_depth,
    };

    if args.json {
        print_json(&output)?;
    } else {
        println!(
            "Keywords: {} total, {} unread, {} read",
            output.store.total, output.store.unread, output.store.read
        );
        for entry in &output.by_type {
            println!("  {:<32} {:>8}", entry.kind, entry.count);
        }
        match output.queue_depth {
            Some(depth) => println!("Fast tier ({}): {} buffered", output.queue_backend, depth),
            None => println!("Fast tier ({}): unavailable", output.queue_backend),
        }
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
