/// Pixel-grid geometry: surface extents, crop rectangles and workgroup tiling
///
/// Everything here is plain index arithmetic shared by the GPU dispatcher,
/// the CPU reference path and the command line parser.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PreprocessError, Result};

/// Edge length of the square workgroup every kernel is compiled with.
/// Must match `@workgroup_size` in the compute shaders.
pub const WORKGROUP_SIZE: u32 = 8;

/// Width and height of a surface in pixels
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub(crate) fn to_wgpu(self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Extent {
    type Err = PreprocessError;

    /// Parse `WxH`, e.g. `224x224`
    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| parse_error(s, "expected WIDTHxHEIGHT"))?;
        let extent = Self::new(parse_u32(s, w)?, parse_u32(s, h)?);
        if extent.is_empty() {
            return Err(parse_error(s, "width and height must be non-zero"));
        }
        Ok(extent)
    }
}

/// Number of workgroups needed to cover `extent` with 8x8 tiles.
/// Partial tiles at the right and bottom edges are rounded up; kernels
/// discard the out-of-range invocations.
pub fn workgroup_count(extent: Extent) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// Rectangle copied out of a source surface by the crop kernel
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Region of `size` centered inside `source`.
    /// The size is clamped to the source first.
    pub fn centered(source: Extent, size: Extent) -> Self {
        let width = size.width.min(source.width);
        let height = size.height.min(source.height);
        Self {
            x: (source.width - width) / 2,
            y: (source.height - height) / 2,
            width,
            height,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// Clamp the region against a source of the given extent.
    ///
    /// The offset has to start inside the source; the size is then shrunk
    /// so that `offset + size` never exceeds the source. A region that ends
    /// up empty is rejected.
    pub fn clamp_to(&self, source: Extent) -> Result<Self> {
        if self.x >= source.width || self.y >= source.height {
            return Err(PreprocessError::CropOutOfBounds { region: *self, bounds: source });
        }

        let clamped = Self {
            x: self.x,
            y: self.y,
            width: self.width.min(source.width - self.x),
            height: self.height.min(source.height - self.y),
        };

        if clamped.extent().is_empty() {
            return Err(PreprocessError::CropOutOfBounds { region: *self, bounds: source });
        }

        Ok(clamped)
    }
}

impl fmt::Display for CropRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

impl FromStr for CropRegion {
    type Err = PreprocessError;

    /// Parse `x,y,width,height`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, w, h] = parts.as_slice() else {
            return Err(parse_error(s, "expected x,y,width,height"));
        };
        Ok(Self::new(
            parse_u32(s, x)?,
            parse_u32(s, y)?,
            parse_u32(s, w)?,
            parse_u32(s, h)?,
        ))
    }
}

fn parse_u32(whole: &str, part: &str) -> Result<u32> {
    part.trim()
        .parse()
        .map_err(|_| parse_error(whole, "not a non-negative integer"))
}

fn parse_error(value: &str, reason: &'static str) -> PreprocessError {
    PreprocessError::Parse { value: value.to_string(), reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_count_rounds_up() {
        assert_eq!(workgroup_count(Extent::new(8, 8)), (1, 1));
        assert_eq!(workgroup_count(Extent::new(9, 8)), (2, 1));
        assert_eq!(workgroup_count(Extent::new(224, 223)), (28, 28));
        assert_eq!(workgroup_count(Extent::new(1, 1)), (1, 1));
    }

    #[test]
    fn test_clamp_shrinks_overhanging_region() {
        let source = Extent::new(100, 50);
        let region = CropRegion::new(80, 40, 64, 64).clamp_to(source).unwrap();
        assert_eq!(region, CropRegion::new(80, 40, 20, 10));
    }

    #[test]
    fn test_clamp_keeps_region_inside_source() {
        let source = Extent::new(100, 50);
        let region = CropRegion::new(10, 5, 20, 20);
        assert_eq!(region.clamp_to(source).unwrap(), region);
    }

    #[test]
    fn test_clamp_rejects_offset_outside_source() {
        let source = Extent::new(100, 50);
        let err = CropRegion::new(100, 0, 10, 10).clamp_to(source).unwrap_err();
        assert!(matches!(err, PreprocessError::CropOutOfBounds { .. }));
    }

    #[test]
    fn test_clamp_rejects_empty_region() {
        let source = Extent::new(100, 50);
        assert!(CropRegion::new(0, 0, 0, 10).clamp_to(source).is_err());
    }

    #[test]
    fn test_centered_crop() {
        let region = CropRegion::centered(Extent::new(256, 200), Extent::new(224, 224));
        assert_eq!(region, CropRegion::new(16, 0, 224, 200));
    }

    #[test]
    fn test_parse_region_and_extent() {
        assert_eq!("1, 2,3,4".parse::<CropRegion>().unwrap(), CropRegion::new(1, 2, 3, 4));
        assert!("1,2,3".parse::<CropRegion>().is_err());
        assert!("1,2,3,-4".parse::<CropRegion>().is_err());

        assert_eq!("224x160".parse::<Extent>().unwrap(), Extent::new(224, 160));
        assert!("224".parse::<Extent>().is_err());
        assert!("0x10".parse::<Extent>().is_err());
    }
}
