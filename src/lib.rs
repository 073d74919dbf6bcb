//! GPU image preprocessing for inference pipelines.
//!
//! Three transforms (normalize, crop, vertical flip) run either as 8x8
//! compute kernels or, on devices without compute support, as full-screen
//! fragment passes. [`Preprocessor`] picks the path, binds the per-channel
//! normalization stats and manages temporary surfaces.

pub mod config;
pub mod cpu;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod logging;
pub mod preprocessor;
pub mod stats;

pub use config::{PipelineConfig, Step};
pub use error::{PreprocessError, Result};
pub use geometry::{CropRegion, Extent};
pub use gpu::{Capabilities, GpuContext, GpuOptions, Surface};
pub use preprocessor::{ExecutionPath, PathPreference, Preprocessor};
pub use stats::NormalizationStats;
