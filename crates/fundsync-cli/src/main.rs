use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fundsync_adapters::{load_fixture_platform, FundraisingPlatform};
use fundsync_storage::{PgStore, Store};
use fundsync_sync::{
    live_platform, CycleOutcome, CycleRunner, PlatformSyncSummary, ReconciliationSummary,
    SyncConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fundsync")]
#[command(about = "Fundraising page sync and CRM reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one platform sync cycle.
    Sync(PlatformArgs),
    /// Run one reconciliation cycle.
    Reconcile(PlatformArgs),
    /// Run both pipelines on the heartbeat until Ctrl-C.
    Run(PlatformArgs),
    /// Apply database migrations.
    Migrate,
}

#[derive(Debug, Args)]
struct PlatformArgs {
    /// Serve platform responses from a JSON fixture instead of the live API.
    #[arg(long, value_name = "PATH")]
    fixtures: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Sync(PlatformArgs { fixtures: None })) {
        Commands::Sync(args) => {
            let runner = build_runner(&args).await?;
            print_sync(runner.run_platform_sync_cycle().await?);
        }
        Commands::Reconcile(args) => {
            let runner = build_runner(&args).await?;
            print_reconcile(runner.run_reconciliation_cycle().await?);
        }
        Commands::Run(args) => {
            let runner = Arc::new(build_runner(&args).await?);
            runner.run_until(shutdown_signal()?).await?;
        }
        Commands::Migrate => {
            let url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
            PgStore::connect(&url).await?.migrate().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Handlers are registered before returning so
/// a signal arriving before the first poll is not lost.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = Result<()>>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        Ok(())
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = Result<()>>> {
    Ok(async {
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        info!("received ctrl-c");
        Ok(())
    })
}

async fn build_runner(args: &PlatformArgs) -> Result<CycleRunner> {
    let config = SyncConfig::from_env()?;
    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url).await?);
    let platform: Arc<dyn FundraisingPlatform> = match &args.fixtures {
        Some(path) => Arc::new(load_fixture_platform(path)?),
        None => live_platform(&config)?,
    };
    info!(platform = platform.name(), batch = config.results_batch, "runner ready");
    Ok(CycleRunner::new(config, store, platform))
}

fn print_sync(outcome: CycleOutcome<PlatformSyncSummary>) {
    match outcome {
        CycleOutcome::Completed(summary) => println!(
            "sync complete: run_id={} selected={} events={} discovered={} fetched={} excluded={}",
            summary.run_id,
            summary.selected,
            summary.discovery.events,
            summary.discovery.pages_inserted,
            summary.results.fetched,
            summary.results.excluded
        ),
        CycleOutcome::Aborted => println!("sync aborted by shutdown"),
        CycleOutcome::Skipped => println!("sync skipped: another cycle is running"),
    }
}

fn print_reconcile(outcome: CycleOutcome<ReconciliationSummary>) {
    match outcome {
        CycleOutcome::Completed(summary) => println!(
            "reconcile complete: run_id={} contacts={} matched={} masters={} details={}",
            summary.run_id,
            summary.matching.contacts,
            summary.matching.matched,
            summary.matching.masters_created,
            summary.stats.details_created
        ),
        CycleOutcome::Aborted => println!("reconcile aborted by shutdown"),
        CycleOutcome::Skipped => println!("reconcile skipped: another cycle is running"),
    }
}
