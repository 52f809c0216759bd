use std::path::PathBuf;

/// Core error type for the chain forward bot.
///
/// Adapter crates map their specific errors into this type so the handlers
/// can decide between a user-facing message and a log line.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid data file: {path}: {reason}")]
    InvalidDataFile { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
