//! # fanpulse-core
//!
//! Core library for fanpulse - the event analytics pipeline of a creator/fan
//! platform.
//!
//! This library provides:
//! - A closed event taxonomy with typed per-action details
//! - Best-effort event ingest and session tracking
//! - Aggregation queries and the user / artist / platform metrics facade
//! - Database storage layer with SQLite
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Write side:** [`EventIngest`] and [`SessionTracker`] append facts through
//!   the [`db::TelemetrySink`] seam and never surface store errors
//! - **Storage:** append-only `events` plus mutable sessions, content
//!   performance snapshots and a catalog mirror in SQLite
//! - **Read side:** [`MetricsService`] aggregates over rolling windows
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fanpulse_core::{Config, Database, MetricsService};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let metrics = MetricsService::new(Arc::new(db), config.analytics.clone());
//! let platform = metrics.platform_metrics(30);
//! println!("{} signups", platform.total_signups);
//! ```

// Re-export commonly used items at the crate root
pub use analytics::MetricsService;
pub use config::Config;
pub use db::{Database, TelemetrySink};
pub use error::{Error, Result};
pub use ingest::{EventIngest, TrackOutcome};
pub use session::SessionTracker;
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod session;
pub mod taxonomy;
pub mod types;
