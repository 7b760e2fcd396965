//! VPNHub traffic engine.
//!
//! Entry point that loads configuration, initializes logging, and wires the
//! database, status sources, and engine loops together.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use vpnhub_core::config::AppConfig;
use vpnhub_core::error::AppError;
use vpnhub_database::repositories::{account, session_log};
use vpnhub_database::{DatabasePool, PgLedger};
use vpnhub_engine::adapters::{
    ManagementClient, OpenVpnSource, StatusSource, WgCli, WireGuardControl, WireGuardSource,
};
use vpnhub_engine::{EngineScheduler, PolicyEngine, ReconciliationPass, TerminationDispatcher};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load_from(&cli.config_dir(), &cli.env()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    let result = match cli.command {
        Commands::Run => run(config).await,
        Commands::Once => once(config).await,
        Commands::Migrate => migrate(config).await,
        Commands::Check => check(config).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Engine error");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Run both engine loops until a shutdown signal arrives.
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting VPNHub engine v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Database connection + migrations ─────────────────
    let db = DatabasePool::connect(&config.database).await?;
    vpnhub_database::migration::run_migrations(db.pool()).await?;

    // ── Step 2: Sources, policy, dispatcher ──────────────────────
    let pass = Arc::new(build_pass(&config, &db)?);

    // ── Step 3: Startup recovery ─────────────────────────────────
    if config.engine.run_startup_recovery {
        pass.startup_recovery().await?;
    }

    // ── Step 4: Engine loops ─────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = EngineScheduler::from_config(Arc::clone(&pass), &config.engine);
    let handles = scheduler.start(shutdown_rx);

    // ── Step 5: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, waiting for in-flight passes...");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .is_err()
        {
            tracing::warn!("Engine loop did not stop within 30s");
        }
    }

    db.close().await;
    tracing::info!("VPNHub engine shut down gracefully");
    Ok(())
}

/// Run one reconciliation pass and one expiry sweep, printing both reports.
async fn once(config: AppConfig) -> Result<(), AppError> {
    let db = DatabasePool::connect(&config.database).await?;
    let pass = build_pass(&config, &db)?;

    let full = pass.run_full().await?;
    let sweep = pass.run_expiry_sweep().await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "reconciliation": full,
            "expiry_sweep": sweep,
        }))?
    );

    db.close().await;
    Ok(())
}

/// Apply pending migrations.
async fn migrate(config: AppConfig) -> Result<(), AppError> {
    let db = DatabasePool::connect(&config.database).await?;
    vpnhub_database::migration::run_migrations(db.pool()).await?;
    db.close().await;
    println!("Migrations applied");
    Ok(())
}

/// Probe the database and every configured source.
async fn check(config: AppConfig) -> Result<(), AppError> {
    let db = DatabasePool::connect(&config.database).await?;
    let healthy = db.health_check().await?;
    let by_status = account::count_by_status(db.pool()).await?;
    let open_sessions = session_log::count_open(db.pool()).await?;

    println!("database: {}", if healthy { "ok" } else { "unhealthy" });
    for (status, count) in by_status {
        println!("  accounts {status}: {count}");
    }
    println!("  open session records: {open_sessions}");

    let (sources, openvpn, _) = build_sources(&config);
    if let Some(client) = &openvpn {
        let available = client.is_available().await;
        println!(
            "openvpn management {}: {}",
            client.addr(),
            if available { "available" } else { "unavailable" }
        );
    }

    for source in &sources {
        let map = source.snapshot().await;
        println!("{} ({} sessions):", source.protocol(), map.len());
        let mut rows: Vec<_> = map.into_values().collect();
        rows.sort_by(|a, b| a.identity.cmp(&b.identity));
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }

    db.close().await;
    Ok(())
}

/// Status sources plus the termination backends they expose.
fn build_sources(
    config: &AppConfig,
) -> (
    Vec<Arc<dyn StatusSource>>,
    Option<ManagementClient>,
    Option<Arc<dyn WireGuardControl>>,
) {
    let mut sources: Vec<Arc<dyn StatusSource>> = Vec::new();
    let mut openvpn = None;
    let mut wireguard = None;

    if config.openvpn.enabled {
        let source = OpenVpnSource::from_config(&config.openvpn);
        openvpn = Some(source.management().clone());
        sources.push(Arc::new(source));
    }

    if config.wireguard.enabled {
        let control: Arc<dyn WireGuardControl> = Arc::new(WgCli::from_config(&config.wireguard));
        sources.push(Arc::new(WireGuardSource::new(Arc::clone(&control))));
        wireguard = Some(control);
    }

    tracing::info!(sources = sources.len(), "Status sources configured");
    (sources, openvpn, wireguard)
}

/// Wire a reconciliation pass over the database.
fn build_pass(config: &AppConfig, db: &DatabasePool) -> Result<ReconciliationPass, AppError> {
    let offset = config.engine.expiry_offset().ok_or_else(|| {
        AppError::configuration("engine.expiry_utc_offset_minutes out of range")
    })?;
    let (sources, openvpn, wireguard) = build_sources(config);

    Ok(ReconciliationPass::new(
        Arc::new(PgLedger::new(db.pool().clone())),
        sources,
        PolicyEngine::new(offset),
        TerminationDispatcher::new(openvpn, wireguard),
    ))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
