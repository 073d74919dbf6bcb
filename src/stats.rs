/// Per-channel normalization statistics
///
/// Models are trained on inputs shifted by a per-channel mean and divided by
/// a per-channel standard deviation. These statistics usually ship next to
/// the model as a small JSON file, either in the plain form
/// `{"mean": [..], "std": [..]}` or in the Hugging Face preprocessor form
/// `{"image_mean": [..], "image_std": [..]}`. Both are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PreprocessError, Result};

/// Mean and standard deviation for the R, G and B channels.
/// Alpha is never normalized.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NormalizationStats {
    #[serde(alias = "image_mean", alias = "norm_mean")]
    pub mean: [f32; 3],

    #[serde(alias = "image_std", alias = "norm_std")]
    pub std: [f32; 3],
}

impl NormalizationStats {
    pub const IMAGENET: Self = Self {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    pub const CLIP: Self = Self {
        mean: [0.481_454_66, 0.457_827_5, 0.408_210_73],
        std: [0.268_629_54, 0.261_302_58, 0.275_777_1],
    };

    pub const SIGLIP: Self = Self {
        mean: [0.5, 0.5, 0.5],
        std: [0.5, 0.5, 0.5],
    };

    /// Leaves values untouched (apart from `scale`)
    pub const IDENTITY: Self = Self {
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
    };

    /// Look up a preset by name (`imagenet`, `clip`, `siglip`, `identity`)
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "imagenet" => Some(Self::IMAGENET),
            "clip" => Some(Self::CLIP),
            "siglip" => Some(Self::SIGLIP),
            "identity" | "none" => Some(Self::IDENTITY),
            _ => None,
        }
    }

    /// Parse and validate stats from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let stats: Self = serde_json::from_str(json)?;
        stats.validate()?;
        Ok(stats)
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Read stats from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let stats = Self::from_json(&json)?;
        log::debug!("loaded normalization stats from {}: {:?}", path.display(), stats);
        Ok(stats)
    }

    /// Reject stats that would produce NaN or infinity on the GPU
    pub fn validate(&self) -> Result<()> {
        if let Some(m) = self.mean.iter().find(|m| !m.is_finite()) {
            return Err(PreprocessError::InvalidStats(format!("mean {m} is not finite")));
        }
        if let Some(s) = self.std.iter().find(|s| !s.is_finite() || **s == 0.0) {
            return Err(PreprocessError::InvalidStats(format!(
                "std {s} must be finite and non-zero"
            )));
        }
        Ok(())
    }

    /// Widen to vec4 for the uniform buffer: alpha gets mean 0 / std 1
    pub fn as_uniform(&self) -> ([f32; 4], [f32; 4]) {
        let [mr, mg, mb] = self.mean;
        let [sr, sg, sb] = self.std;
        ([mr, mg, mb, 0.0], [sr, sg, sb, 1.0])
    }
}

/// Reject a post-normalization multiplier that would produce NaN or
/// infinity on the GPU
pub fn validate_scale(scale: f32) -> Result<()> {
    if !scale.is_finite() {
        return Err(PreprocessError::InvalidScale(scale));
    }
    Ok(())
}

impl Default for NormalizationStats {
    fn default() -> Self {
        Self::IMAGENET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_imagenet() {
        assert_eq!(NormalizationStats::default(), NormalizationStats::IMAGENET);
    }

    #[test]
    fn test_parse_plain_and_hf_keys() {
        let plain =
            NormalizationStats::from_json(r#"{"mean": [0.5, 0.5, 0.5], "std": [0.5, 0.5, 0.5]}"#)
                .unwrap();
        assert_eq!(plain, NormalizationStats::SIGLIP);

        let hf = NormalizationStats::from_json(
            r#"{
                "image_mean": [0.485, 0.456, 0.406],
                "image_std": [0.229, 0.224, 0.225]
            }"#,
        )
        .unwrap();
        assert_eq!(hf, NormalizationStats::IMAGENET);
    }

    #[test]
    fn test_zero_std_rejected() {
        let err =
            NormalizationStats::from_json(r#"{"mean": [0, 0, 0], "std": [1, 0, 1]}"#).unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidStats(_)));
    }

    #[test]
    fn test_wrong_channel_count_rejected() {
        assert!(NormalizationStats::from_json(r#"{"mean": [0, 0], "std": [1, 1]}"#).is_err());
    }

    #[test]
    fn test_uniform_alpha_lane() {
        let (mean, std) = NormalizationStats::IMAGENET.as_uniform();
        assert_eq!(mean[3], 0.0);
        assert_eq!(std[3], 1.0);
        assert_eq!(&mean[..3], &NormalizationStats::IMAGENET.mean);
    }

    #[test]
    fn test_json_round_trip_and_presets() {
        let json = NormalizationStats::CLIP.to_json().unwrap();
        assert_eq!(NormalizationStats::from_json(&json).unwrap(), NormalizationStats::CLIP);

        assert_eq!(NormalizationStats::preset("ImageNet"), Some(NormalizationStats::IMAGENET));
        assert_eq!(NormalizationStats::preset("unknown"), None);
    }

    #[test]
    fn test_load_from_file() {
        let name = format!("gpu-preprocess-stats-{}.json", std::process::id());
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, r#"{"image_mean": [0.5, 0.5, 0.5], "image_std": [0.5, 0.5, 0.5]}"#)
            .unwrap();
        let loaded = NormalizationStats::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.unwrap(), NormalizationStats::SIGLIP);

        assert!(matches!(
            NormalizationStats::load(std::env::temp_dir().join("gpu-preprocess-missing.json")),
            Err(PreprocessError::Io(_))
        ));
    }

    #[test]
    fn test_scale_must_be_finite() {
        assert!(validate_scale(1.0).is_ok());
        assert!(validate_scale(-255.0).is_ok());
        assert!(matches!(validate_scale(f32::NAN), Err(PreprocessError::InvalidScale(_))));
        assert!(validate_scale(f32::NEG_INFINITY).is_err());
    }
}
