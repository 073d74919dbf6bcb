/// Error type shared by every preprocessing operation

use thiserror::Error;

use crate::geometry::{CropRegion, Extent};

pub type Result<T> = std::result::Result<T, PreprocessError>;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("compute shaders are not supported by this device")]
    ComputeUnsupported,

    #[error("Rgba32Float render targets are not supported by this device")]
    FragmentUnsupported,

    #[error("invalid normalization stats: {0}")]
    InvalidStats(String),

    #[error("invalid scale {0}: must be finite")]
    InvalidScale(f32),

    #[error("cannot allocate a {extent} surface: each side must be between 1 and {max}")]
    SurfaceSize { extent: Extent, max: u32 },

    #[error("crop {region} does not fit a {bounds} source")]
    CropOutOfBounds { region: CropRegion, bounds: Extent },

    #[error("destination is {actual}, expected {expected}")]
    ExtentMismatch { expected: Extent, actual: Extent },

    #[error("image is {actual}, surface is {expected}")]
    ImageSizeMismatch { expected: Extent, actual: Extent },

    #[error("unsupported surface format {0:?}, expected Rgba32Float")]
    UnsupportedFormat(wgpu::TextureFormat),

    #[error("GPU readback failed: {0}")]
    Readback(String),

    #[error("invalid value '{value}': {reason}")]
    Parse { value: String, reason: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
