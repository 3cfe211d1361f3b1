//! Error types for brain operations.

use thiserror::Error;

/// Errors that can occur talking to the upstream model.
#[derive(Debug, Error)]
pub enum BrainError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network-level failure reaching the API.
    #[error("network error: {0}")]
    Network(String),

    /// The API answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The streaming body broke off mid-read.
    #[error("stream error: {0}")]
    Stream(String),
}
