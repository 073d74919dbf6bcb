/// Kernel selection and the uniform block every kernel reads

use crate::geometry::CropRegion;
use crate::stats::NormalizationStats;

/// The three transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Normalize,
    Crop,
    Flip,
}

impl Kernel {
    pub const ALL: [Kernel; 3] = [Kernel::Normalize, Kernel::Crop, Kernel::Flip];

    pub(crate) fn compute_entry(self) -> &'static str {
        match self {
            Kernel::Normalize => "cs_normalize",
            Kernel::Crop => "cs_crop",
            Kernel::Flip => "cs_flip",
        }
    }

    pub(crate) fn fragment_entry(self) -> &'static str {
        match self {
            Kernel::Normalize => "fs_normalize",
            Kernel::Crop => "fs_crop",
            Kernel::Flip => "fs_flip",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// GPU-friendly mirror of the WGSL `KernelParams` struct.
/// Must match the WGSL layout: two vec4, two vec2<u32>, one f32, padded to 64 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuKernelParams {
    mean: [f32; 4],
    stddev: [f32; 4],
    offset: [u32; 2],
    size: [u32; 2],
    scale: f32,
    _padding: [f32; 3],
}

impl GpuKernelParams {
    pub fn normalize(stats: &NormalizationStats, scale: f32) -> Self {
        let (mean, stddev) = stats.as_uniform();
        Self {
            mean,
            stddev,
            scale,
            ..Self::default()
        }
    }

    /// `region` must already be clamped to the source
    pub fn crop(region: &CropRegion) -> Self {
        Self {
            offset: [region.x, region.y],
            size: [region.width, region.height],
            ..Self::default()
        }
    }

    pub fn flip() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout_size() {
        assert_eq!(std::mem::size_of::<GpuKernelParams>(), 64);
    }

    #[test]
    fn test_normalize_params() {
        let params = GpuKernelParams::normalize(&NormalizationStats::SIGLIP, 2.0);
        assert_eq!(params.mean, [0.5, 0.5, 0.5, 0.0]);
        assert_eq!(params.stddev, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(params.scale, 2.0);
    }

    #[test]
    fn test_crop_params() {
        let params = GpuKernelParams::crop(&CropRegion::new(3, 4, 5, 6));
        assert_eq!(params.offset, [3, 4]);
        assert_eq!(params.size, [5, 6]);
    }

    #[test]
    fn test_kernel_indices_are_dense() {
        for (i, kernel) in Kernel::ALL.iter().enumerate() {
            assert_eq!(kernel.index(), i);
        }
    }
}
