//! Error types for tte

use thiserror::Error;

/// tte error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raw event data rejected at load time (ordering, channel range, non-finite values).
    #[error("Data error: {0}")]
    Data(String),

    /// Invalid or missing configuration: binning method/parameters, specification strings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A derived artifact (bins, background fit, spectra) was read before it was computed.
    #[error("Not computed: {0}")]
    NotComputed(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
