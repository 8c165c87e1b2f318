//! Error types for caption and keyword loading

use thiserror::Error;

/// Result type alias for caption operations
pub type CaptionResult<T> = Result<T, CaptionError>;

#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed keyword file: {0}")]
    Keywords(#[from] serde_json::Error),

    #[error("Keyword '{label}' has an invalid range: {reason}")]
    InvalidRange { label: String, reason: String },
}
