// src/error.rs
// Standardized error types for Gatehouse

use thiserror::Error;

/// Main error type for the Gatehouse library
#[derive(Error, Debug)]
pub enum GatehouseError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider error ({status}): {body}")]
    Provider { status: u16, body: String },

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using GatehouseError
pub type Result<T> = std::result::Result<T, GatehouseError>;

impl From<String> for GatehouseError {
    fn from(s: String) -> Self {
        GatehouseError::Other(s)
    }
}

impl From<tokio::task::JoinError> for GatehouseError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            GatehouseError::Cancelled
        } else {
            GatehouseError::Other(err.to_string())
        }
    }
}

impl From<GatehouseError> for String {
    fn from(err: GatehouseError) -> Self {
        err.to_string()
    }
}
