/// GPU side of the preprocessing primitives
///
/// Architecture:
/// - `context.rs` - adapter/device acquisition and capability detection
/// - `surface.rs` - float textures, uploads, readback, temporary pool
/// - `shaders.rs` - WGSL compute kernels and fragment passes
/// - `params.rs` - kernel selection and the shared uniform block
/// - `compute.rs` - compute path (one dispatch per operation)
/// - `material.rs` - fragment path (one blit per operation)

pub mod compute;
pub mod context;
pub mod material;
pub mod params;
pub mod shaders;
pub mod surface;

pub use compute::ComputeKernels;
pub use context::{Capabilities, GpuContext, GpuOptions};
pub use material::MaterialPasses;
pub use params::{GpuKernelParams, Kernel};
pub use surface::{Surface, SurfacePool, SURFACE_FORMAT};
