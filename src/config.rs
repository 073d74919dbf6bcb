/// Pipeline configuration files
///
/// A pipeline file names the execution path, the normalization stats and
/// the ordered list of steps applied to every frame:
///
/// ```json
/// {
///   "path": "auto",
///   "stats": { "mean": [0.485, 0.456, 0.406], "std": [0.229, 0.224, 0.225] },
///   "scale": 1.0,
///   "steps": [
///     { "op": "center_crop", "width": 224, "height": 224 },
///     { "op": "flip" },
///     { "op": "normalize" }
///   ]
/// }
/// ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::{CropRegion, Extent};
use crate::gpu::GpuOptions;
use crate::preprocessor::PathPreference;
use crate::stats::{validate_scale, NormalizationStats};

/// One transform in a pipeline
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Subtract mean, divide by std, multiply by scale
    Normalize,
    /// Copy a rectangle out of the frame
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// Copy a rectangle centered in the frame
    CenterCrop { width: u32, height: u32 },
    /// Mirror rows (`y -> height - y - 1`)
    Flip,
}

impl Step {
    /// Crop rectangle for crop steps, resolved against the incoming extent
    /// and clamped to it
    pub fn crop_region(&self, source: Extent) -> Option<Result<CropRegion>> {
        match *self {
            Step::Crop { x, y, width, height } => {
                Some(CropRegion::new(x, y, width, height).clamp_to(source))
            }
            Step::CenterCrop { width, height } => {
                Some(CropRegion::centered(source, Extent::new(width, height)).clamp_to(source))
            }
            Step::Normalize | Step::Flip => None,
        }
    }

    /// Extent produced by this step for an input of `source`
    pub fn output_extent(&self, source: Extent) -> Result<Extent> {
        match self.crop_region(source) {
            Some(region) => Ok(region?.extent()),
            None => Ok(source),
        }
    }
}

impl From<CropRegion> for Step {
    fn from(region: CropRegion) -> Self {
        Step::Crop {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
        }
    }
}

/// Everything needed to build a preprocessor and run it on frames
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub path: PathPreference,
    pub stats: NormalizationStats,
    pub scale: f32,
    pub gpu: GpuOptions,
    pub steps: Vec<Step>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            path: PathPreference::Auto,
            stats: NormalizationStats::default(),
            scale: 1.0,
            gpu: GpuOptions::default(),
            steps: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a pipeline from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check stats and scale
    pub fn validate(&self) -> Result<()> {
        self.stats.validate()?;
        validate_scale(self.scale)
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a pipeline file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::debug!(
            "loaded pipeline from {}: {} step(s), path {:?}",
            path.display(),
            config.steps.len(),
            config.path,
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.scale, 1.0);
        assert!(config.steps.is_empty());
    }

    #[test]
    fn test_parse_full_pipeline() {
        let config = PipelineConfig::from_json(
            r#"{
                "path": "fragment",
                "stats": { "image_mean": [0.5, 0.5, 0.5], "image_std": [0.5, 0.5, 0.5] },
                "scale": 255.0,
                "gpu": { "force_fallback_adapter": true },
                "steps": [
                    { "op": "crop", "x": 1, "y": 2, "width": 3, "height": 4 },
                    { "op": "center_crop", "width": 224, "height": 224 },
                    { "op": "flip" },
                    { "op": "normalize" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.path, PathPreference::Fragment);
        assert_eq!(config.stats, NormalizationStats::SIGLIP);
        assert_eq!(config.scale, 255.0);
        assert!(config.gpu.force_fallback_adapter);
        assert!(config.gpu.high_performance);
        assert_eq!(
            config.steps,
            vec![
                Step::Crop { x: 1, y: 2, width: 3, height: 4 },
                Step::CenterCrop { width: 224, height: 224 },
                Step::Flip,
                Step::Normalize,
            ]
        );
    }

    #[test]
    fn test_load_shipped_pipeline() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/configs/imagenet_224.json");
        let config = PipelineConfig::load(path).unwrap();
        assert_eq!(config.stats, NormalizationStats::IMAGENET);
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.steps[2], Step::Normalize);
    }

    #[test]
    fn test_invalid_stats_rejected() {
        let err =
            PipelineConfig::from_json(r#"{ "stats": { "mean": [0, 0, 0], "std": [0, 1, 1] } }"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_non_finite_scale_rejected() {
        // serde_json cannot spell NaN, but an overflowing literal parses to infinity
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "scale": 1e40 }"#),
            Err(crate::error::PreprocessError::InvalidScale(_))
        ));

        let config = PipelineConfig { scale: f32::NAN, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelineConfig {
            path: PathPreference::Compute,
            stats: NormalizationStats::CLIP,
            scale: 255.0,
            gpu: GpuOptions { high_performance: false, force_fallback_adapter: true },
            steps: vec![
                Step::CenterCrop { width: 336, height: 336 },
                Step::Crop { x: 4, y: 8, width: 320, height: 320 },
                Step::Flip,
                Step::Normalize,
            ],
        };
        let json = config.to_json().unwrap();
        assert!(json.contains(r#""op": "center_crop""#));
        assert_eq!(PipelineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_unknown_op_rejected() {
        assert!(PipelineConfig::from_json(r#"{ "steps": [ { "op": "rotate" } ] }"#).is_err());
    }

    #[test]
    fn test_step_output_extent() {
        let source = Extent::new(320, 240);
        assert_eq!(Step::Flip.output_extent(source).unwrap(), source);
        assert_eq!(Step::Normalize.output_extent(source).unwrap(), source);
        assert_eq!(
            Step::CenterCrop { width: 224, height: 224 }.output_extent(source).unwrap(),
            Extent::new(224, 224)
        );
        assert_eq!(
            Step::Crop { x: 300, y: 0, width: 64, height: 64 }.output_extent(source).unwrap(),
            Extent::new(20, 64)
        );
        assert!(Step::Crop { x: 320, y: 0, width: 1, height: 1 }.output_extent(source).is_err());
    }
}
