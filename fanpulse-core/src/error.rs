//! Error types for fanpulse-core

use thiserror::Error;

/// Main error type for the fanpulse-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Action name outside the closed taxonomy
    #[error("unknown action: {0}")]
    InvalidAction(String),

    /// Context name outside the closed taxonomy
    #[error("unknown context: {0}")]
    InvalidContext(String),
}

/// Result type alias for fanpulse-core
pub type Result<T> = std::result::Result<T, Error>;
