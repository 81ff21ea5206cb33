//! fanpulse-sweep - close idle sessions once and exit
//!
//! Meant for cron when the server runs with `--no-sweep`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fanpulse_core::{Config, Database, SessionTracker};

#[derive(Parser)]
#[command(name = "fanpulse-sweep")]
#[command(about = "Close sessions that have gone idle")]
#[command(version)]
struct Args {
    /// Idle minutes before a session is closed, overrides the config file
    #[arg(short, long)]
    idle_minutes: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(minutes) = args.idle_minutes {
        config.sessions.idle_timeout_minutes = minutes;
    }

    let _log_guard = fanpulse_core::logging::init(&config.logging, false)
        .context("failed to initialize logging")?;

    let db = Database::open(&Config::database_path()).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let tracker = SessionTracker::new(Arc::new(db));
    let closed = tracker.sweep_idle(config.sessions.idle_timeout());

    tracing::info!(
        closed,
        idle_minutes = config.sessions.idle_timeout_minutes,
        "Sweep finished"
    );
    println!("Closed {closed} idle session(s)");

    Ok(())
}
