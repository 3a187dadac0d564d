//! Error types for pipeline construction and execution

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] iq_core::CoreError),

    #[error("DSP error: {0}")]
    Dsp(#[from] iq_dsp::DspError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] iq_io::IoModError),

    #[error("Stage panicked: {0}")]
    StagePanic(&'static str),

    #[error("Pipeline error: {0}")]
    Internal(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
