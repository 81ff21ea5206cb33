//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/fanpulse/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/fanpulse/` (~/.config/fanpulse/)
//! - Data: `$XDG_DATA_HOME/fanpulse/` (~/.local/share/fanpulse/)
//! - State/Logs: `$XDG_STATE_HOME/fanpulse/` (~/.local/state/fanpulse/)

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;

/// Log files are named `<prefix>.<YYYY-MM-DD>.<suffix>`, one per UTC day.
pub const LOG_FILE_PREFIX: &str = "fanpulse";
pub const LOG_FILE_SUFFIX: &str = "log";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Aggregation and metrics configuration
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Session tracking configuration
    #[serde(default)]
    pub sessions: SessionConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Weights applied to the trending score.
///
/// Each weight multiplies the matching count over the trending lookback;
/// the score is the sum of the four products.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct TrendingWeights {
    #[serde(default = "default_play_weight")]
    pub plays: f64,
    #[serde(default = "default_like_weight")]
    pub likes: f64,
    #[serde(default = "default_share_weight")]
    pub shares: f64,
    #[serde(default = "default_listener_weight")]
    pub unique_listeners: f64,
}

impl Default for TrendingWeights {
    fn default() -> Self {
        Self {
            plays: default_play_weight(),
            likes: default_like_weight(),
            shares: default_share_weight(),
            unique_listeners: default_listener_weight(),
        }
    }
}

fn default_play_weight() -> f64 {
    1.0
}

fn default_like_weight() -> f64 {
    2.0
}

fn default_share_weight() -> f64 {
    3.0
}

fn default_listener_weight() -> f64 {
    1.5
}

/// Aggregation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Lookback window used when a caller does not pass `days`
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,

    /// Lookback window for trending songs
    #[serde(default = "default_trending_lookback_days")]
    pub trending_lookback_days: u32,

    /// Number of trending songs reported in platform metrics
    #[serde(default = "default_trending_limit")]
    pub trending_limit: usize,

    /// Fraction of new followers reported as new subscribers.
    ///
    /// This is a placeholder estimate, not a measured quantity.
    #[serde(default = "default_new_subscriber_ratio")]
    pub new_subscriber_ratio: f64,

    /// Trending score weights
    #[serde(default)]
    pub trending_weights: TrendingWeights,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
            trending_lookback_days: default_trending_lookback_days(),
            trending_limit: default_trending_limit(),
            new_subscriber_ratio: default_new_subscriber_ratio(),
            trending_weights: TrendingWeights::default(),
        }
    }
}

impl AnalyticsConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.default_window_days == 0 || self.default_window_days > MAX_WINDOW_DAYS {
            return Err(Error::Config(format!(
                "analytics.default_window_days must be between 1 and {}",
                MAX_WINDOW_DAYS
            )));
        }
        if self.trending_lookback_days == 0 {
            return Err(Error::Config(
                "analytics.trending_lookback_days must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.new_subscriber_ratio) {
            return Err(Error::Config(
                "analytics.new_subscriber_ratio must be between 0 and 1".to_string(),
            ));
        }
        let w = &self.trending_weights;
        if [w.plays, w.likes, w.shares, w.unique_listeners]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(Error::Config(
                "analytics.trending_weights must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp a caller-supplied lookback to the supported range.
    pub fn window_days(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_window_days)
            .clamp(1, MAX_WINDOW_DAYS)
    }
}

/// Longest lookback a caller may request.
pub const MAX_WINDOW_DAYS: u32 = 365;

fn default_window_days() -> u32 {
    30
}

fn default_trending_lookback_days() -> u32 {
    7
}

fn default_trending_limit() -> usize {
    10
}

fn default_new_subscriber_ratio() -> f64 {
    0.3
}

/// Session tracking configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Minutes without activity before the sweep closes a session
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u32,

    /// Seconds between sweeps when running inside the server
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionConfig {
    /// Idle timeout as a chrono duration.
    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.idle_timeout_minutes))
    }
}

fn default_idle_timeout_minutes() -> u32 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Socket address to bind
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.analytics.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/fanpulse/config.toml` (~/.config/fanpulse/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("fanpulse").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("fanpulse")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("fanpulse")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/fanpulse/data.db` (~/.local/share/fanpulse/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file written on `day`
    ///
    /// `$XDG_STATE_HOME/fanpulse/fanpulse.YYYY-MM-DD.log`
    pub fn log_path(day: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!(
            "{LOG_FILE_PREFIX}.{}.{LOG_FILE_SUFFIX}",
            day.format("%Y-%m-%d")
        ))
    }
}
