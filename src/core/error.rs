//! Error types for Cumin

use thiserror::Error;

/// Result type alias using Cumin's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Cumin error types
///
/// Host-scoped failures (a command failing or timing out on one host) are
/// never surfaced through this enum; they are aggregated into the run's
/// success ratio by the executor. Everything here propagates upward.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Cyclic alias reference: {name}")]
    CyclicAlias { name: String },

    #[error("Unknown alias: {name}")]
    UnknownAlias { name: String },

    #[error("Invalid {backend} query: {message}")]
    InvalidQuery { backend: &'static str, message: String },

    #[error("Backend {backend} unreachable: {message}")]
    BackendUnreachable { backend: &'static str, message: String },

    #[error("Backend {backend} rejected credentials: {message}")]
    BackendAuth { backend: &'static str, message: String },

    #[error("Worker error: {message}")]
    Worker { message: String },

    #[error("Success threshold not met: {ratio:.1}% < {threshold:.1}%")]
    ThresholdNotMet { ratio: f64, threshold: f64 },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Invalid node state transition: {from} -> {to}")]
    InvalidState { from: &'static str, to: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Shorthand for a configuration error with a formatted message
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config { message: message.into() }
    }

    /// Shorthand for an executor misuse error
    pub fn worker(message: impl Into<String>) -> Self {
        Error::Worker { message: message.into() }
    }
}
