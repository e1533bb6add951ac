use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::calibration::{resolve_reference_width, CalibrationRatio, DEFAULT_REFERENCE_WIDTH_CM};
use crate::errors::{MeasureError, Result};

/// Configuration for the measurement tool
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub input_path: String,
    pub output_base_dir: String,

    /// Learned detector weights; the contour detector is used when unset or unloadable
    #[serde(default)]
    pub model_path: Option<String>,

    #[serde(default = "default_model_input_size")]
    pub model_input_size: u32,

    #[serde(default = "default_model_score_threshold")]
    pub model_score_threshold: f32,

    /// TrueType font used for the class/confidence label on annotated images
    #[serde(default)]
    pub font_path: Option<String>,

    /// Caller-supplied calibration; non-positive values fall back to the calibrator
    #[serde(default)]
    pub pixels_per_cm: Option<f64>,

    #[serde(default = "default_reference_width_cm")]
    pub reference_width_cm: f64,

    // Measurement service
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_parallel")]
    pub use_parallel: bool,

    #[serde(default = "default_save_annotated")]
    pub save_annotated: bool,

    /// Longest side allowed before an input is downscaled, None keeps full resolution
    #[serde(default)]
    pub max_image_dimension: Option<u32>,
}

fn default_model_input_size() -> u32 {
    640
}

fn default_model_score_threshold() -> f32 {
    0.25
}

fn default_reference_width_cm() -> f64 {
    DEFAULT_REFERENCE_WIDTH_CM
}

fn default_worker_count() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_parallel() -> bool {
    true
}

fn default_save_annotated() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: "./input".to_string(),
            output_base_dir: "./output".to_string(),
            model_path: None,
            model_input_size: default_model_input_size(),
            model_score_threshold: default_model_score_threshold(),
            font_path: None,
            pixels_per_cm: None,
            reference_width_cm: default_reference_width_cm(),
            worker_count: default_worker_count(),
            timeout_secs: default_timeout_secs(),
            use_parallel: default_parallel(),
            save_annotated: default_save_annotated(),
            max_image_dimension: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            MeasureError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| MeasureError::ConfigLoad {
            source: e,
            path: path.to_path_buf(),
        })?;

        Ok(config)
    }

    /// Load the config file if it exists, otherwise fall back to defaults
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Check parameter ranges without touching the filesystem
    pub fn validate_parameters(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(MeasureError::Config(
                "worker_count must be > 0".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(MeasureError::Config(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        if self.model_input_size == 0 || self.model_input_size % 32 != 0 {
            return Err(MeasureError::Config(
                "model_input_size must be a positive multiple of 32".to_string(),
            ));
        }

        if !(self.model_score_threshold > 0.0 && self.model_score_threshold <= 1.0) {
            return Err(MeasureError::Config(
                "model_score_threshold must be in (0.0, 1.0]".to_string(),
            ));
        }

        if let Some(max_dim) = self.max_image_dimension {
            if max_dim < 32 {
                return Err(MeasureError::Config(
                    "max_image_dimension must be >= 32 when set".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Replace unusable calibration inputs with their defaults
    ///
    /// A non-positive or non-finite ratio means "no ratio" and the calibrator
    /// is used; a non-positive reference width falls back to 10 cm.
    pub fn normalize_calibration(&mut self) {
        if let Some(ratio) = self.pixels_per_cm {
            if CalibrationRatio::new(ratio).is_none() {
                tracing::warn!(pixels_per_cm = ratio, "ignoring invalid calibration ratio, using default calibration");
                self.pixels_per_cm = None;
            }
        }

        let reference_width_cm = resolve_reference_width(Some(self.reference_width_cm));
        if reference_width_cm != self.reference_width_cm {
            tracing::warn!(
                reference_width_cm = self.reference_width_cm,
                default = reference_width_cm,
                "invalid reference width, using default"
            );
            self.reference_width_cm = reference_width_cm;
        }
    }

    /// Validate configuration and prepare output directories
    pub fn validate(&self) -> Result<()> {
        let input_path = PathBuf::from(&self.input_path);
        if !input_path.exists() {
            return Err(MeasureError::InvalidPath(input_path));
        }

        self.validate_parameters()?;

        let base_dir = PathBuf::from(&self.output_base_dir);
        fs::create_dir_all(&base_dir)?;
        if self.save_annotated {
            fs::create_dir_all(base_dir.join("annotated"))?;
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            MeasureError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate_parameters().is_ok());
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.reference_width_cm, 10.0);
    }

    #[test]
    fn non_positive_calibration_falls_back() {
        for (ratio, width) in [(0.0, 0.0), (-5.0, -2.5), (f64::NAN, f64::INFINITY)] {
            let mut config = Config {
                pixels_per_cm: Some(ratio),
                reference_width_cm: width,
                ..Config::default()
            };
            assert!(config.validate_parameters().is_ok());

            config.normalize_calibration();
            assert_eq!(config.pixels_per_cm, None);
            assert_eq!(config.reference_width_cm, DEFAULT_REFERENCE_WIDTH_CM);
        }
    }

    #[test]
    fn valid_calibration_is_kept() {
        let mut config = Config {
            pixels_per_cm: Some(41.5),
            reference_width_cm: 8.56,
            ..Config::default()
        };
        config.normalize_calibration();
        assert_eq!(config.pixels_per_cm, Some(41.5));
        assert_eq!(config.reference_width_cm, 8.56);
    }

    #[test]
    fn rejects_odd_model_size() {
        let config = Config {
            model_input_size: 600,
            ..Config::default()
        };
        assert!(config.validate_parameters().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = toml::from_str(
            "input_path = \"./in\"\noutput_base_dir = \"./out\"\npixels_per_cm = 40.0\n",
        )
        .unwrap();
        assert_eq!(config.pixels_per_cm, Some(40.0));
        assert_eq!(config.model_input_size, 640);
        assert!(config.model_path.is_none());
        assert!(config.save_annotated);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config {
            font_path: Some("fonts/DejaVuSans.ttf".to_string()),
            ..Config::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.font_path, config.font_path);
        assert_eq!(loaded.worker_count, config.worker_count);
    }
}
