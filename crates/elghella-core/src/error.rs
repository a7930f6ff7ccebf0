//! Error types for Elghella

use thiserror::Error;

/// Result type alias for Elghella operations
pub type ElghellaResult<T> = Result<T, ElghellaError>;

/// Main error type for configuration and shared plumbing
#[derive(Error, Debug)]
pub enum ElghellaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl ElghellaError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
