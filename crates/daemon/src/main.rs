//! Kairos Engine - daemon entry point (composition root)

mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use kairos_api_rpc::RpcServer;
use kairos_core::application::{
    shutdown_channel, CircuitBreaker, ControlService, MaintenanceSweeper, Orchestrator,
    OutcomeResolver, TriggerLoop, TypeDispatcher,
};
use kairos_core::domain::JobFamily;
use kairos_core::port::id_provider::UuidProvider;
use kairos_core::port::time_provider::SystemTimeProvider;
use kairos_core::port::{IdProvider, JobStore, Maintenance, TimeProvider};
use kairos_infra_handlers::{CommandHandler, HttpProbeHandler, WebhookHandler};
use kairos_infra_sqlite::{create_pool_at, run_migrations, SqliteJobStore, SqliteMaintenance};
use settings::{DaemonConfig, LogFormat};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long in-flight executions may take to drain after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const DRAIN_POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "kairos-engine", version, about = "Kairos job engine daemon")]
struct Args {
    /// Extra TOML config file (overrides the platform config file)
    #[arg(short, long, env = "KAIROS_CONFIG")]
    config: Option<PathBuf>,
}

fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("kairos=info"))
        .context("Failed to create env filter")?;

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Configuration, then logging in the configured format
    let cfg = DaemonConfig::load(args.config.as_deref())?;
    init_logging(cfg.log_format)?;
    info!("Kairos Engine v{} starting...", kairos_core::VERSION);

    // 2. Database
    let db_path = cfg.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!(db_path = %db_path.display(), "Initializing database...");

    let pool = create_pool_at(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 3. Adapters
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);
    let store: Arc<dyn JobStore> =
        Arc::new(SqliteJobStore::new(pool.clone(), time_provider.clone()));
    let maintenance: Arc<dyn Maintenance> = Arc::new(SqliteMaintenance::new(pool.clone()));

    let command = Arc::new(CommandHandler::new(cfg.command_env_allowlist.clone()));
    let dispatcher = TypeDispatcher::new()
        .with_handler(JobFamily::Maintenance, command.clone())
        .with_handler(JobFamily::Custom, command)
        .with_handler(
            JobFamily::Webhook,
            Arc::new(WebhookHandler::new(cfg.webhook_timeout())?),
        )
        .with_handler(
            JobFamily::Monitoring,
            Arc::new(HttpProbeHandler::new(cfg.webhook_timeout())?),
        );
    info!(families = ?dispatcher.registered_families(), "Handlers registered");

    // 4. Application services
    let backoff = cfg
        .backoff_strategy
        .build(cfg.backoff_factor, cfg.max_backoff_ms);
    let resolver = OutcomeResolver::new(
        CircuitBreaker::new(cfg.circuit_breaker()),
        Arc::from(backoff),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        dispatcher,
        resolver.clone(),
        id_provider.clone(),
        time_provider.clone(),
        cfg.orchestrator(),
    ));
    let sweeper = Arc::new(MaintenanceSweeper::new(
        store.clone(),
        maintenance.clone(),
        resolver,
        id_provider.clone(),
        time_provider.clone(),
        cfg.sweeper(),
    ));
    let control = Arc::new(
        ControlService::new(
            store,
            orchestrator.clone(),
            sweeper.clone(),
            maintenance,
            id_provider,
            time_provider,
        )
        .with_max_job_timeout_secs(cfg.max_job_timeout_secs),
    );

    // 5. Startup sweep reclaims jobs left RUNNING by a previous crash
    let report = sweeper.sweep_once().await;
    info!(?report, "Startup sweep completed");

    // 6. JSON-RPC server
    let (rpc_addr, rpc_handle) = RpcServer::new(cfg.rpc(), control)
        .start()
        .await
        .context("RPC server start failed")?;
    info!(%rpc_addr, "JSON-RPC server listening");

    // 7. Background loops
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let trigger = TriggerLoop::new(orchestrator.clone(), cfg.trigger());
    let trigger_shutdown = shutdown_rx.clone();
    let trigger_handle = tokio::spawn(async move { trigger.run(trigger_shutdown).await });

    let sweeper_handle = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move { sweeper.run(shutdown_rx).await })
    };

    info!("System ready. Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    wait_for_signal().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown: stop intake, then drain in-flight executions
    shutdown_tx.shutdown();
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server already stopped");
    }
    if let Err(e) = trigger_handle.await {
        error!(error = %e, "Trigger loop panicked");
    }
    if let Err(e) = sweeper_handle.await {
        error!(error = %e, "Maintenance sweeper panicked");
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while orchestrator.in_flight_count() > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            in_flight = orchestrator.in_flight_count(),
            "Executions still running at shutdown; the sweeper reclaims them on next start"
        );
    }

    pool.close().await;
    info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}
