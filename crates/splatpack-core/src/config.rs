//! Compression settings and quality presets

use crate::color::ColorFormat;
use crate::encode::VectorFormat;
use crate::sh::SHFormat;
use crate::{Result, SplatsError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Named trade-offs between asset size and fidelity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    VeryHigh,
    High,
    #[default]
    Medium,
    Low,
    VeryLow,
    /// Formats chosen individually
    Custom,
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "very-high" | "very_high" => Ok(Quality::VeryHigh),
            "high" => Ok(Quality::High),
            "medium" => Ok(Quality::Medium),
            "low" => Ok(Quality::Low),
            "very-low" | "very_low" => Ok(Quality::VeryLow),
            "custom" => Ok(Quality::Custom),
            other => Err(format!("unknown quality: {}", other)),
        }
    }
}

/// Configuration for one compression run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub pos_format: VectorFormat,
    pub scale_format: VectorFormat,
    pub color_format: ColorFormat,
    pub sh_format: SHFormat,
    /// Seed for every random choice made by SH clustering
    pub seed: u64,
    /// Worker threads for this run; `None` uses one per core
    pub threads: Option<usize>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::from_quality(Quality::Medium)
    }
}

impl CompressionConfig {
    /// Formats for a preset. `Custom` gives the `Medium` formats as a starting point.
    pub fn from_quality(quality: Quality) -> Self {
        let (pos_format, scale_format, color_format, sh_format) = match quality {
            Quality::VeryHigh => (
                VectorFormat::Float32,
                VectorFormat::Float32,
                ColorFormat::Float32x4,
                SHFormat::Float32,
            ),
            Quality::High => (
                VectorFormat::Norm16,
                VectorFormat::Norm16,
                ColorFormat::Float16x4,
                SHFormat::Norm11,
            ),
            Quality::Medium | Quality::Custom => (
                VectorFormat::Norm11,
                VectorFormat::Norm11,
                ColorFormat::Norm8x4,
                SHFormat::Norm6,
            ),
            Quality::Low => (
                VectorFormat::Norm11,
                VectorFormat::Norm6,
                ColorFormat::Norm8x4,
                SHFormat::Cluster16k,
            ),
            Quality::VeryLow => (
                VectorFormat::Norm11,
                VectorFormat::Norm6,
                ColorFormat::BC7,
                SHFormat::Cluster4k,
            ),
        };
        Self {
            pos_format,
            scale_format,
            color_format,
            sh_format,
            seed: 1,
            threads: None,
        }
    }

    /// The preset these formats correspond to, or `Custom`
    pub fn quality(&self) -> Quality {
        [
            Quality::VeryHigh,
            Quality::High,
            Quality::Medium,
            Quality::Low,
            Quality::VeryLow,
        ]
        .into_iter()
        .find(|&q| {
            let preset = Self::from_quality(q);
            preset.pos_format == self.pos_format
                && preset.scale_format == self.scale_format
                && preset.color_format == self.color_format
                && preset.sh_format == self.sh_format
        })
        .unwrap_or(Quality::Custom)
    }

    /// Whether output is chunk-quantized. Only the all-Float32 combination
    /// is lossless enough to skip chunking.
    pub fn uses_chunks(&self) -> bool {
        !(self.pos_format == VectorFormat::Float32
            && self.scale_format == VectorFormat::Float32
            && self.color_format == ColorFormat::Float32x4
            && self.sh_format == SHFormat::Float32)
    }

    /// Load from a JSON file. Missing fields take their `Medium` defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        if config.threads == Some(0) {
            return Err(SplatsError::ThreadPool("thread count must be at least 1".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_medium() {
        let config = CompressionConfig::default();
        assert_eq!(config.pos_format, VectorFormat::Norm11);
        assert_eq!(config.scale_format, VectorFormat::Norm11);
        assert_eq!(config.color_format, ColorFormat::Norm8x4);
        assert_eq!(config.sh_format, SHFormat::Norm6);
        assert_eq!(config.seed, 1);
        assert_eq!(config.quality(), Quality::Medium);
    }

    #[test]
    fn test_presets_round_trip_through_quality() {
        for q in [
            Quality::VeryHigh,
            Quality::High,
            Quality::Medium,
            Quality::Low,
            Quality::VeryLow,
        ] {
            assert_eq!(CompressionConfig::from_quality(q).quality(), q);
        }
    }

    #[test]
    fn test_parse_quality() {
        assert_eq!("very-low".parse::<Quality>(), Ok(Quality::VeryLow));
        assert_eq!("very_high".parse::<Quality>(), Ok(Quality::VeryHigh));
        assert!("ultra".parse::<Quality>().is_err());
    }

    #[test]
    fn test_custom_mix_reports_custom() {
        let config = CompressionConfig {
            sh_format: SHFormat::Float16,
            ..CompressionConfig::default()
        };
        assert_eq!(config.quality(), Quality::Custom);
    }

    #[test]
    fn test_uses_chunks() {
        assert!(!CompressionConfig::from_quality(Quality::VeryHigh).uses_chunks());
        assert!(CompressionConfig::from_quality(Quality::High).uses_chunks());

        let almost_lossless = CompressionConfig {
            sh_format: SHFormat::Float16,
            ..CompressionConfig::from_quality(Quality::VeryHigh)
        };
        assert!(almost_lossless.uses_chunks());
    }

    #[test]
    fn test_from_json_partial() {
        let config = CompressionConfig::from_json(r#"{"sh_format": "cluster8k", "seed": 7}"#).unwrap();
        assert_eq!(config.sh_format, SHFormat::Cluster8k);
        assert_eq!(config.seed, 7);
        assert_eq!(config.pos_format, VectorFormat::Norm11);
        assert_eq!(config.threads, None);
    }

    #[test]
    fn test_from_json_rejects_zero_threads() {
        assert!(matches!(
            CompressionConfig::from_json(r#"{"threads": 0}"#),
            Err(SplatsError::ThreadPool(_))
        ));
    }

    #[test]
    fn test_from_json_rejects_unknown_format() {
        assert!(matches!(
            CompressionConfig::from_json(r#"{"color_format": "bc1"}"#),
            Err(SplatsError::Json(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = CompressionConfig {
            threads: Some(2),
            ..CompressionConfig::from_quality(Quality::Low)
        };
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(CompressionConfig::from_json(&text).unwrap(), config);
    }
}
