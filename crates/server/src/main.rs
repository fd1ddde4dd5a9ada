//! Olimpiada server entry point.
//!
//! Loads configuration, opens and migrates the database, starts the web
//! server and the phase watcher, and handles graceful shutdown.

mod scheduler;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use olimpiada_core::config::AppConfig;
use olimpiada_core::db::Database;
use olimpiada_core::{Clock, Orchestrator, SystemClock};
use olimpiada_web::WebServer;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Olimpiada competition lifecycle server.
#[derive(Parser, Debug)]
#[command(
    name = "olimpiada-server",
    version,
    about = "Competition lifecycle orchestrator for a yearly olympiad"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        AppConfig::load_from_file(&args.config).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables in config")?;
    config
        .validate()
        .context("configuration validation failed")?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    let clock = Arc::new(SystemClock::new(config.calendar.utc_offset_minutes));

    info!("========================================");
    info!("  Olimpiada Server v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file    : {}", args.config.display());
    info!("Web listen     : {}", config.web.listen);
    info!("Data dir       : {}", config.server.data_dir.display());
    info!("UTC offset     : {} min", config.calendar.utc_offset_minutes);
    info!("Today          : {}", clock.today());
    info!("Watch interval : {}s", config.server.watch_interval_secs);
    info!("Auth           : {}", if config.web.auth_enabled() { "enabled" } else { "disabled" });
    info!("Log level      : {}", log_level);
    info!("========================================");

    if !config.web.auth_enabled() {
        warn!(
            roles = ?config.web.anonymous_roles,
            "no users configured, every request runs with the anonymous roles"
        );
    }

    std::fs::create_dir_all(&config.server.data_dir).context("failed to create data directory")?;

    let db_path = config.server.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    let schema_version = db
        .initialize()
        .context("failed to initialize database schema")?;
    info!(
        "Database initialized at {} (schema v{})",
        db_path.display(),
        schema_version
    );

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(db),
        clock,
        config.policy.clone(),
    ));

    // Catalog entries added since the matrices were last written get
    // explicit `false` cells.
    let filled = orchestrator
        .backfill_matrices()
        .context("failed to backfill permission matrices")?;
    if filled > 0 {
        info!(cells = filled, "backfilled missing permission cells");
    }

    match orchestrator.session_state() {
        Ok(state) => info!(%state, "session state at startup"),
        Err(e) => warn!(error = %e, "could not derive session state"),
    }

    let web_server = WebServer::new(config.clone(), orchestrator.clone());
    let ws_broadcast = web_server.broadcast_sender();
    let listen_addr = config.web.listen.clone();

    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start(&listen_addr).await {
            error!("Web server error: {}", e);
        }
    });

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let watcher_shutdown = shutdown.clone();

    let interval = std::time::Duration::from_secs(config.server.watch_interval_secs);
    let mut watcher = scheduler::PhaseWatcher::new(orchestrator.clone(), interval, ws_broadcast);

    let watcher_handle = tokio::spawn(async move {
        watcher.run(watcher_shutdown).await;
    });

    signals::wait_for_shutdown().await;

    info!("Shutdown signal received, stopping...");

    shutdown.notify_waiters();

    match tokio::time::timeout(std::time::Duration::from_secs(10), watcher_handle).await {
        Ok(Ok(())) => info!("phase watcher stopped gracefully"),
        Ok(Err(e)) => warn!("phase watcher task error: {}", e),
        Err(_) => warn!("phase watcher did not stop within 10s, forcing shutdown"),
    }

    web_handle.abort();

    info!("Olimpiada server stopped.");
    Ok(())
}
