//! Pure domain services.

pub mod sampler;

pub use sampler::{SamplingMode, checked_sample_factor, sample_factor};
