//! Error types for the Dhvani engine
//!
//! Expected negative outcomes (refused connections, silent ports, no match)
//! are never errors; they are `None` or empty results at the call site.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DhvaniError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid port specification: {0}")]
    InvalidPort(String),

    #[error("Probe corpus error at line {line}: {reason}")]
    Corpus { line: usize, reason: String },

    #[error("Malformed probe: {0}")]
    MalformedProbe(String),

    #[error("Malformed matcher: {0}")]
    MalformedMatcher(String),

    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("Unsupported step method: {0}")]
    UnsupportedMethod(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DhvaniError {
    /// Build a corpus error for a 1-based line number.
    pub fn corpus(line: usize, reason: impl Into<String>) -> Self {
        DhvaniError::Corpus {
            line,
            reason: reason.into(),
        }
    }
}

/// Result type alias for Dhvani operations
pub type DhvaniResult<T> = Result<T, DhvaniError>;
