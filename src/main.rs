//! # OPMS Sync Entry Point
//!
//! `serve` runs the HTTP API together with the dispatcher and maintenance
//! loops; the other subcommands run one piece of that on its own.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use opms_sync::{
    config::{AppConfig, ConfigLoader},
    db,
    dispatcher::JobDispatcher,
    erp::{ErpClient, RestletErpClient},
    maintenance::Maintenance,
    queue::{DbSyncQueue, SyncQueue},
    repositories::{CatalogStore, DryRunRepository, SeaOrmCatalogStore, SyncJobRepository},
    server::{AppState, run_server},
    telemetry,
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

/// OPMS ⇄ NetSuite sync service
#[derive(Parser)]
#[command(name = "opms-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API, the queue dispatcher and maintenance
    Serve,
    /// Run only the queue dispatcher
    Worker {
        /// Process a single batch and exit
        #[arg(long)]
        once: bool,
    },
    /// Apply pending database migrations and exit
    Migrate,
    /// Run one maintenance pass (stale reclaim and retention) and exit
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let config = Arc::new(config);
    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command {
        Command::Migrate => db::run_migrations(&db).await,
        Command::Serve => serve(config, db).await,
        Command::Worker { once } => worker(&config, db, once).await,
        Command::Cleanup => {
            let report = maintenance(&config, db).run_once().await?;
            tracing::info!(?report, "Maintenance pass complete");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn erp_client(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn ErpClient>>> {
    if config.erp.base_url.is_none() {
        tracing::warn!("No ERP base URL configured; item pushes will fail permanently");
        return Ok(None);
    }
    let client = RestletErpClient::new(&config.erp).context("building ERP client")?;
    Ok(Some(Arc::new(client)))
}

fn dispatcher(config: &AppConfig, db: DatabaseConnection) -> anyhow::Result<JobDispatcher> {
    let queue: Arc<dyn SyncQueue> = Arc::new(DbSyncQueue::new(db.clone()));
    let catalog: Arc<dyn CatalogStore> = Arc::new(SeaOrmCatalogStore);
    Ok(JobDispatcher::new(
        config,
        db,
        queue,
        catalog,
        erp_client(config)?,
    ))
}

fn maintenance(config: &AppConfig, db: DatabaseConnection) -> Maintenance {
    Maintenance::new(
        Arc::new(DbSyncQueue::new(db.clone())),
        SyncJobRepository::new(db.clone()),
        DryRunRepository::new(db),
        config.maintenance.clone(),
    )
}

async fn worker(config: &AppConfig, db: DatabaseConnection, once: bool) -> anyhow::Result<()> {
    let dispatcher = dispatcher(config, db)?;

    if once {
        let report = dispatcher.process_batch().await?;
        tracing::info!(?report, "Batch processed");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    dispatcher.run(shutdown).await;
    Ok(())
}

async fn serve(config: Arc<AppConfig>, db: DatabaseConnection) -> anyhow::Result<()> {
    db::run_migrations(&db).await?;

    let queue: Arc<dyn SyncQueue> = Arc::new(DbSyncQueue::new(db.clone()));
    let catalog: Arc<dyn CatalogStore> = Arc::new(SeaOrmCatalogStore);
    let state = AppState::new(config.clone(), db.clone(), queue, catalog);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let dispatcher = dispatcher(&config, db.clone())?;
    let dispatcher_token = shutdown.clone();
    let dispatcher_task = tokio::spawn(async move { dispatcher.run(dispatcher_token).await });

    let maintenance = maintenance(&config, db);
    let maintenance_token = shutdown.clone();
    let maintenance_task = tokio::spawn(async move { maintenance.run(maintenance_token).await });

    let server_result = run_server(config, state, shutdown.clone()).await;
    // A server error must also stop the background loops.
    shutdown.cancel();

    if let Err(err) = dispatcher_task.await {
        tracing::error!(error = %err, "Dispatcher task panicked");
    }
    if let Err(err) = maintenance_task.await {
        tracing::error!(error = %err, "Maintenance task panicked");
    }

    server_result
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });
}
