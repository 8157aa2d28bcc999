//! OCR Configuration
//!
//! Pipeline settings stored in TOML format. Every threshold of the detector
//! post-processing and the decoder is a named, overridable value here.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::preprocess::{DET_MEAN, DET_STD, REC_MEAN, REC_STD};

/// Default remote location for PaddleOCR ONNX exports
pub const DEFAULT_MODEL_BASE_URL: &str = "https://huggingface.co/monkt/paddleocr-onnx/resolve/main";

/// OCR settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Recognition language (names the model directory, e.g. "english")
    pub language: String,
    /// Try GPU execution providers before falling back to CPU
    pub use_gpu: bool,
    /// Intra-op threads per inference session
    pub intra_threads: usize,
    /// Override the models directory (defaults to the data dir)
    pub models_dir: Option<PathBuf>,
    /// Base URL used to download missing models
    pub model_base_url: String,
    /// Detection settings
    pub detection: DetectionParams,
    /// Recognition settings
    pub recognition: RecognitionParams,
    /// CTC decoder settings
    pub decoder: DecoderParams,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "english".to_string(),
            use_gpu: true,
            intra_threads: 4,
            models_dir: None,
            model_base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            detection: DetectionParams::default(),
            recognition: RecognitionParams::default(),
            decoder: DecoderParams::default(),
        }
    }
}

/// Detection preprocessing and box-finder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Longer side of the detector input is limited to this
    pub limit_side_len: u32,
    /// Cells strictly above this probability belong to text
    pub threshold: f32,
    /// Components smaller than `map_w * map_h * min_area_ratio` are dropped
    pub min_area_ratio: f32,
    /// Minimum component width/height in map cells
    pub min_blob_side: usize,
    /// Expansion factor applied to the area/perimeter margin
    pub unclip_ratio: f32,
    /// Boxes whose scaled width or height is at most this (px) are dropped
    pub min_box_side: f32,
    /// Stop after this many boxes
    pub max_boxes: usize,
    /// Normalization mean [R, G, B]
    pub mean: [f32; 3],
    /// Normalization std [R, G, B]
    pub std: [f32; 3],
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            limit_side_len: 1280,
            threshold: 0.3,
            min_area_ratio: 0.00005,
            min_blob_side: 3,
            unclip_ratio: 1.6,
            min_box_side: 6.0,
            max_boxes: 256,
            mean: DET_MEAN,
            std: DET_STD,
        }
    }
}

/// Recognition preprocessing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionParams {
    /// Fixed input height of the recognizer
    pub target_height: u32,
    /// Resized crop width is clamped to [min_width, max_width]
    pub min_width: u32,
    pub max_width: u32,
    /// Canvas width is padded up to a multiple of this
    pub width_align: u32,
    /// Crops with a mean luma below this are also tried inverted
    pub invert_luma_threshold: f32,
    /// `recognize_all` drops results below this confidence
    pub min_confidence: f32,
    /// Append a space symbol to the dictionary (models exported with `use_space_char`)
    pub append_space_symbol: bool,
    /// Normalization mean [R, G, B]
    pub mean: [f32; 3],
    /// Normalization std [R, G, B]
    pub std: [f32; 3],
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            target_height: 48,
            min_width: 16,
            max_width: 1536,
            width_align: 32,
            invert_luma_threshold: 120.0,
            min_confidence: 0.0,
            append_space_symbol: false,
            mean: REC_MEAN,
            std: REC_STD,
        }
    }
}

/// CTC decoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderParams {
    /// A layout is plausible when its class count is within this many
    /// classes of the dictionary size
    pub class_count_tolerance: usize,
}

impl Default for DecoderParams {
    fn default() -> Self {
        Self {
            class_count_tolerance: 500,
        }
    }
}

impl OcrConfig {
    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.language.trim().is_empty() {
            anyhow::bail!("language must not be empty");
        }
        if self.detection.limit_side_len < 32 {
            anyhow::bail!(
                "detection.limit_side_len must be at least 32, got {}",
                self.detection.limit_side_len
            );
        }
        if self.recognition.target_height == 0 {
            anyhow::bail!("recognition.target_height must be positive");
        }
        if self.recognition.min_width == 0 || self.recognition.min_width > self.recognition.max_width {
            anyhow::bail!(
                "recognition width range [{}, {}] is invalid",
                self.recognition.min_width,
                self.recognition.max_width
            );
        }
        let mut all_std = self.detection.std.iter().chain(self.recognition.std.iter());
        if all_std.any(|s| *s == 0.0) {
            anyhow::bail!("normalization std must not contain zeros");
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<OcrConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: OcrConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from file, or defaults if the file doesn't exist
pub fn load_or_default(path: &Path) -> Result<OcrConfig> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(OcrConfig::default())
    }
}

/// Save configuration to file
pub fn save_config(config: &OcrConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = OcrConfig::default();

        assert_eq!(config.language, "english");
        assert!(config.use_gpu);
        assert!(config.models_dir.is_none());

        assert_eq!(config.detection.limit_side_len, 1280);
        assert!((config.detection.threshold - 0.3).abs() < f32::EPSILON);
        assert!((config.detection.min_area_ratio - 0.00005).abs() < f32::EPSILON);
        assert!((config.detection.unclip_ratio - 1.6).abs() < f32::EPSILON);
        assert_eq!(config.detection.max_boxes, 256);

        assert_eq!(config.recognition.target_height, 48);
        assert_eq!(config.recognition.min_width, 16);
        assert_eq!(config.recognition.max_width, 1536);
        assert!((config.recognition.invert_luma_threshold - 120.0).abs() < f32::EPSILON);

        assert_eq!(config.decoder.class_count_tolerance, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = OcrConfig::default();
        config.language = "chinese".to_string();
        config.detection.threshold = 0.45;
        config.models_dir = Some(PathBuf::from("/opt/models"));

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: OcrConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.language, "chinese");
        assert!((parsed.detection.threshold - 0.45).abs() < f32::EPSILON);
        assert_eq!(parsed.models_dir, Some(PathBuf::from("/opt/models")));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: OcrConfig = toml::from_str(
            r#"
            language = "japanese"

            [detection]
            max_boxes = 16
            "#,
        )
        .unwrap();

        assert_eq!(parsed.language, "japanese");
        assert_eq!(parsed.detection.max_boxes, 16);
        assert!((parsed.detection.threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(parsed.recognition.target_height, 48);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = OcrConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.language, loaded.language);
        assert_eq!(config.detection.max_boxes, loaded.detection.max_boxes);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());

        let fallback = load_or_default(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(fallback.language, "english");
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = OcrConfig::default();
        config.recognition.min_width = 2000;
        assert!(config.validate().is_err());

        let mut config = OcrConfig::default();
        config.detection.std = [0.0, 0.2, 0.2];
        assert!(config.validate().is_err());
    }
}
