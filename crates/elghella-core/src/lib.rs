//! Elghella Core Library
//!
//! This crate provides shared configuration and errors for the Elghella cache agent.

pub mod config;
pub mod error;

pub use config::{AgentConfig, NotificationConfig, RealtimeConfig};
pub use error::{ElghellaError, ElghellaResult};
