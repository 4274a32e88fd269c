//! Error types for the mutag toolkit

use thiserror::Error;

/// Toolkit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Correction lookup or evaluation error
    #[error("Correction error: {0}")]
    Correction(String),

    /// Event input error (missing column, bad layout)
    #[error("Input error: {0}")]
    Input(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// External tool failed to start or returned a failure
    #[error("External tool error: {0}")]
    External(String),

    /// Not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl Error {
    /// Attach a file path to an I/O error message.
    pub fn io_at(path: &std::path::Path, err: std::io::Error) -> Self {
        Error::Io(std::io::Error::new(err.kind(), format!("{}: {}", path.display(), err)))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
