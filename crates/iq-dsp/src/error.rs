//! Error types for DSP construction and processing

use thiserror::Error;

/// DSP errors
#[derive(Error, Debug)]
pub enum DspError {
    #[error("Filter design failed: {0}")]
    FilterDesign(String),

    #[error("Rate converter construction failed: {0}")]
    ResamplerConstruction(String),

    #[error("Rate conversion failed: {0}")]
    Resample(String),

    #[error("Output buffer too small: need {needed}, have {available}")]
    OutputTooSmall { needed: usize, available: usize },
}

impl From<rubato::ResamplerConstructionError> for DspError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        DspError::ResamplerConstruction(e.to_string())
    }
}

impl From<rubato::ResampleError> for DspError {
    fn from(e: rubato::ResampleError) -> Self {
        DspError::Resample(e.to_string())
    }
}

/// Result type for DSP operations
pub type DspResult<T> = Result<T, DspError>;
