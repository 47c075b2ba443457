//! Error types for wxdigest-core

use std::path::PathBuf;

use thiserror::Error;

use crate::analysis::ProviderFailure;

/// Main error type for the wxdigest-core library
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

    /// The chat data root directory does not exist
    #[error("chat data directory not found: {}", .0.display())]
    DataDirNotFound(PathBuf),

    /// No message store file exists for the account
    #[error("message store not found (looked for {})", display_paths(.0))]
    StoreNotFound(Vec<PathBuf>),

    /// The store file exists but is not readable as SQLite (usually encrypted)
    #[error("message store at {} is encrypted or not a database: {reason}", .path.display())]
    StoreEncrypted { path: PathBuf, reason: String },

    /// Window start is after its end
    #[error("invalid time window: {0}")]
    InvalidWindow(String),

    /// Unparseable date argument
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    /// The language-model provider rejected or failed the request
    #[error("{0}")]
    Provider(ProviderFailure),

    /// LLM plumbing error (client construction, runtime)
    #[error("LLM error: {0}")]
    Llm(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for wxdigest-core
pub type Result<T> = std::result::Result<T, Error>;
