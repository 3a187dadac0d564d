//! Error types for source and sink adapters

use thiserror::Error;

/// Adapter errors
#[derive(Error, Debug)]
pub enum IoModError {
    #[error("Input not found: {0}")]
    InputNotFound(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Container does not support format: {0}")]
    UnsupportedContainerFormat(String),

    #[error("Operation not supported by this adapter: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for adapter operations
pub type IoModResult<T> = Result<T, IoModError>;
