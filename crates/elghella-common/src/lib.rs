//! # Elghella Common
//!
//! Ambient utilities shared by the Elghella cache agent crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Retry with exponential backoff
//! - Optional timeouts around network calls

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

/// Errors raised by the shared async utilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// The wrapped operation did not finish in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}
