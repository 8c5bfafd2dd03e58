//! Common error types for driveocr.

use thiserror::Error;

/// Top-level error type for driveocr operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credential definition missing or unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Authorization or token exchange failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Remote service refused the request.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Remote call failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Operation did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Operation was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Remote document could not be turned into text.
    #[error("Conversion error: {0}")]
    Conversion(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// The underlying message without the variant prefix.
    ///
    /// Remote failures carry the provider's own wording; this is what gets
    /// shown per file, e.g. `quota exceeded`.
    pub fn message(&self) -> String {
        match self {
            Error::Io(e) => e.to_string(),
            Error::Serialization(msg)
            | Error::InvalidInput(msg)
            | Error::NotFound(msg)
            | Error::Configuration(msg)
            | Error::Authentication(msg)
            | Error::PermissionDenied(msg)
            | Error::Network(msg)
            | Error::Timeout(msg)
            | Error::Cancelled(msg)
            | Error::Conversion(msg) => msg.clone(),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
