//! Error types for core configuration and format handling

use thiserror::Error;

/// Core errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown sample format: {0}")]
    UnknownFormat(String),

    #[error("Unknown format tag: {0:#04x}")]
    UnknownFormatTag(u8),

    #[error("Invalid filter request: {0}")]
    InvalidFilter(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
