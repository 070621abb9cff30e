//! Error types
//!
//! Faults inside user extensions (filters, formatters) never show up here:
//! they are contained by the sandbox and rendered inline in the transcript.
//! This enum covers what is surfaced to callers of the library itself.

use thiserror::Error;

/// Boxed error used at the transport and body seams
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Library error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The reqwest transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A body formatter rejected its input
    #[error("{0}")]
    Format(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
