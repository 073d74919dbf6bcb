/// CPU reference implementation of the three transforms
///
/// Same semantics as the GPU kernels, built on `image::imageops`. Used to
/// check both GPU paths and to process frames on machines without a usable
/// adapter.

use image::{imageops, Rgba32FImage};

use crate::config::Step;
use crate::error::Result;
use crate::geometry::{CropRegion, Extent};
use crate::stats::{validate_scale, NormalizationStats};

/// `(rgb - mean) / std * scale`, alpha untouched
pub fn normalize(image: &Rgba32FImage, stats: &NormalizationStats, scale: f32) -> Rgba32FImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] - stats.mean[c]) / stats.std[c] * scale;
        }
    }
    output
}

/// Copy `region`, clamped to the image
pub fn crop(image: &Rgba32FImage, region: CropRegion) -> Result<Rgba32FImage> {
    let region = region.clamp_to(Extent::new(image.width(), image.height()))?;
    Ok(imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}

/// Vertical mirror
pub fn flip(image: &Rgba32FImage) -> Rgba32FImage {
    imageops::flip_vertical(image)
}

/// Run one step
pub fn apply(
    image: &Rgba32FImage,
    step: &Step,
    stats: &NormalizationStats,
    scale: f32,
) -> Result<Rgba32FImage> {
    match *step {
        Step::Normalize => Ok(normalize(image, stats, scale)),
        Step::Flip => Ok(flip(image)),
        Step::Crop { x, y, width, height } => crop(image, CropRegion::new(x, y, width, height)),
        Step::CenterCrop { width, height } => {
            let source = Extent::new(image.width(), image.height());
            crop(image, CropRegion::centered(source, Extent::new(width, height)))
        }
    }
}

/// Run `steps` in order
pub fn run(
    image: &Rgba32FImage,
    steps: &[Step],
    stats: &NormalizationStats,
    scale: f32,
) -> Result<Rgba32FImage> {
    stats.validate()?;
    validate_scale(scale)?;
    let mut current = image.clone();
    for step in steps {
        current = apply(&current, step, stats, scale)?;
    }
    Ok(current)
}

/// Planar CHW tensor of the RGB channels (alpha dropped), the layout most
/// vision models take as input
pub fn to_planar_rgb(image: &Rgba32FImage) -> Vec<f32> {
    let plane = image.width() as usize * image.height() as usize;
    let mut tensor = vec![0.0; plane * 3];
    for (i, pixel) in image.pixels().enumerate() {
        tensor[i] = pixel[0];
        tensor[plane + i] = pixel[1];
        tensor[2 * plane + i] = pixel[2];
    }
    tensor
}
