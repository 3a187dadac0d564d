//! iq-core: shared types for the iqstream pipeline
//!
//! The vocabulary every other crate speaks:
//! - `formats` - the fifteen-entry sample-format catalogue and its
//!   lossless-within-representation conversions to and from `Complex<f32>`
//! - `chunk` - the fixed-capacity work unit that flows through the pipeline
//! - `config` - the pipeline configuration model and its validation
//! - `tunables` - every compile-time constant in one place

pub mod chunk;
pub mod config;
pub mod error;
pub mod formats;
pub mod tunables;

pub use chunk::{Chunk, ChunkCapacities};
pub use config::{
    AgcProfile, FilterImpl, FilterKind, FilterOptions, FilterRequest, PipelineConfig,
};
pub use error::{CoreError, CoreResult};
pub use formats::SampleFormat;

/// Complex baseband sample type used throughout the pipeline.
pub type IqSample = num_complex::Complex<f32>;
