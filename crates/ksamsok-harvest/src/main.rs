//! K-samsök Harvest - Main entry point

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ksamsok_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use ksamsok_common::ServiceMetadata;
use sqlx::PgPool;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use ksamsok_harvest::config::{HarvestConfig, HarvestSettings};
use ksamsok_harvest::db;
use ksamsok_harvest::harvest::{
    HarvestRunner, HarvestSummary, MemoryContentStore, PgContentStore, RdfContentAnalyzer,
    RunOptions, StatusService, TracingStatusService,
};

#[derive(Parser, Debug)]
#[command(name = "ksamsok-harvest", version, about = "OAI-PMH harvester for K-samsök")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Harvest a ListRecords response into the content table
    Harvest {
        /// Service identifier the records belong to
        #[arg(short, long)]
        service: String,

        /// ListRecords response document
        #[arg(short, long)]
        file: PathBuf,

        /// Accept status="deleted" headers from this service
        #[arg(long)]
        can_send_deletes: bool,

        /// Reset rows left pending by an aborted run first
        #[arg(long)]
        resume: bool,

        /// Run against an empty in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset rows left pending by an aborted run
    Recover {
        #[arg(short, long)]
        service: String,
    },

    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("ksamsok-harvest")
        .filter_directives("sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    if let Err(e) = execute_command(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Harvest {
            service,
            file,
            can_send_deletes,
            resume,
            dry_run,
            json,
        } => {
            let service = ServiceMetadata::new(service, can_send_deletes)?;
            let summary = harvest(&service, &file, RunOptions { resume }, dry_run).await?;
            print_summary(&summary, json)
        },
        Commands::Recover { service } => {
            let service = ServiceMetadata::new(service, false)?;
            let config = HarvestConfig::load()?;
            let pool = connect(&config).await?;
            let mut store = PgContentStore::begin(pool).await?;
            let status = TracingStatusService::new();

            let reset = HarvestRunner::new(&RdfContentAnalyzer, &status)
                .with_settings(config.harvest)
                .recover(&mut store, &service)
                .await?;
            println!("Reset {} pending records for service {}", reset, service.id);
            Ok(())
        },
        Commands::Migrate => {
            let config = HarvestConfig::load()?;
            let pool = connect(&config).await?;
            db::run_migrations(&pool).await?;
            println!("Migrations applied");
            Ok(())
        },
    }
}

async fn harvest(
    service: &ServiceMetadata,
    file: &Path,
    options: RunOptions,
    dry_run: bool,
) -> Result<HarvestSummary> {
    let input = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let input = BufReader::new(input);

    let status = Arc::new(TracingStatusService::new());
    let interrupt = spawn_interrupt_handler(Arc::clone(&status), service.id.clone());

    let result = if dry_run {
        info!(service_id = %service.id, "Dry run against in-memory store");
        let settings = HarvestSettings::from_env();
        settings.validate()?;
        let mut store = MemoryContentStore::new();
        HarvestRunner::new(&RdfContentAnalyzer, status.as_ref())
            .with_settings(settings)
            .run(&mut store, service, input, options)
            .await
    } else {
        let config = HarvestConfig::load()?;
        let pool = connect(&config).await?;
        let mut store = PgContentStore::begin(pool).await?;
        HarvestRunner::new(&RdfContentAnalyzer, status.as_ref())
            .with_settings(config.harvest)
            .run(&mut store, service, input, options)
            .await
    };

    interrupt.abort();
    Ok(result?)
}

/// Open the pool and make sure the database answers before any work starts
async fn connect(config: &HarvestConfig) -> Result<PgPool> {
    let pool = db::create_pool(&config.database).await?;
    db::health_check(&pool)
        .await
        .context("Database is not reachable")?;
    Ok(pool)
}

/// Request an interrupt of the run on Ctrl-C
fn spawn_interrupt_handler(
    status: Arc<TracingStatusService>,
    service_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!(service_id = %service_id, "Ctrl-C received, interrupting harvest");
                status.request_interrupt(&service_id);
            },
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    })
}

fn print_summary(summary: &HarvestSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("Harvest of service {} finished", summary.service_id);
    println!("  records:  {}", summary.records);
    println!("  inserted: {}", summary.inserted);
    println!("  updated:  {}", summary.updated);
    println!("  deleted:  {}", summary.deleted);
    println!("  swept:    {}", summary.swept);
    if summary.reset > 0 {
        println!("  reset:    {}", summary.reset);
    }
    if !summary.problems.is_empty() {
        println!("  problems: {}", summary.problems.len());
        for problem in &summary.problems {
            println!("    - {}", problem);
        }
    }
    Ok(())
}
