//! fanpulse - analytics service for a creator/fan platform
//!
//! Serves the ingest and metrics HTTP API and closes idle sessions in the
//! background.

mod api;
mod error;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fanpulse_core::{Config, Database, SessionTracker};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "fanpulse")]
#[command(about = "Run the fanpulse analytics API")]
#[command(version)]
struct Args {
    /// Address to bind, overrides `server.bind` from the config file
    #[arg(short, long)]
    bind: Option<String>,

    /// Disable the background idle-session sweep
    #[arg(long)]
    no_sweep: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = fanpulse_core::logging::init(&config.logging, true)
        .context("failed to initialize logging")?;

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    let db = Arc::new(db);

    let state = api::AppState::new(db, &config);

    if !args.no_sweep {
        spawn_sweeper(state.sessions.clone(), &config);
    }

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!(bind = %bind, "fanpulse listening");
    println!("fanpulse listening on http://{bind}");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("fanpulse shut down");
    Ok(())
}

/// Close idle sessions on a fixed interval.
fn spawn_sweeper(sessions: SessionTracker, config: &Config) {
    let idle_timeout = config.sessions.idle_timeout();
    let period = Duration::from_secs(config.sessions.sweep_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // first tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let tracker = sessions.clone();
            match tokio::task::spawn_blocking(move || tracker.sweep_idle(idle_timeout)).await {
                Ok(0) => {}
                Ok(closed) => tracing::info!(closed, "Closed idle sessions"),
                Err(e) => tracing::error!(error = %e, "Session sweep task failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
