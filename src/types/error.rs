//! Unified error type for the crate
//!
//! Errors are serializable so the embedding tool layer can forward them
//! as-is. Nothing in the watch/triage/notify core propagates these across a
//! component boundary; they surface as log lines instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum WatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for WatchError {
    fn from(err: std::io::Error) -> Self {
        WatchError::Store(err.to_string())
    }
}

impl From<toml::de::Error> for WatchError {
    fn from(err: toml::de::Error) -> Self {
        WatchError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(err: serde_json::Error) -> Self {
        WatchError::Parse(err.to_string())
    }
}

impl From<String> for WatchError {
    fn from(err: String) -> Self {
        WatchError::Other(err)
    }
}

impl From<&str> for WatchError {
    fn from(err: &str) -> Self {
        WatchError::Other(err.to_string())
    }
}

/// Result type alias using WatchError
pub type Result<T> = std::result::Result<T, WatchError>;
