use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Top-level application configuration. Every section falls back to its
/// defaults when omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub preprocess: NormalizerConfig,
    pub ocr: OcrConfig,
    pub ner: NerConfig,
    pub resolver: ResolverConfig,
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.preprocess;
        if p.scale.is_nan() || p.scale <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "preprocess.scale",
                reason: format!("must be positive, got {}", p.scale),
            });
        }
        if p.skew_step_deg.is_nan() || p.skew_step_deg <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "preprocess.skew_step_deg",
                reason: format!("must be positive, got {}", p.skew_step_deg),
            });
        }
        if p.blur_sigma.is_nan() || p.blur_sigma <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "preprocess.blur_sigma",
                reason: format!("must be positive, got {}", p.blur_sigma),
            });
        }
        if p.skew_limit_deg < 0.0 {
            return Err(ConfigError::Invalid {
                key: "preprocess.skew_limit_deg",
                reason: format!("must not be negative, got {}", p.skew_limit_deg),
            });
        }
        if let Some(band) = p.color_bands.iter().find(|b| b.hue_min > b.hue_max || b.hue_max > 180) {
            return Err(ConfigError::Invalid {
                key: "preprocess.color_bands",
                reason: format!("hue band {}..={} outside 0..=180", band.hue_min, band.hue_max),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Hue range in OpenCV units (0–180).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HueBand {
    pub hue_min: u8,
    pub hue_max: u8,
}

impl HueBand {
    pub const fn new(hue_min: u8, hue_max: u8) -> Self {
        Self { hue_min, hue_max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Erase colored annotation lines before binarization.
    pub remove_color_lines: bool,
    /// Hue bands treated as annotation ink. Red wraps around, so it takes two.
    pub color_bands: Vec<HueBand>,
    pub min_saturation: u8,
    pub min_value: u8,
    pub mask_dilate_passes: u8,
    pub inpaint_radius: u32,
    /// Mean intensity below this is treated as dark mode (light text on dark).
    pub dark_mode_threshold: f32,
    pub scale: f32,
    pub dark_binary_threshold: u8,
    pub blur_sigma: f32,
    pub skew_limit_deg: f32,
    pub skew_step_deg: f32,
    /// Angles with a smaller magnitude are not worth resampling for.
    pub skew_min_deg: f32,
    pub pad: u32,
    /// Side length of the blank image returned when the input is unusable.
    pub fallback_size: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            remove_color_lines: true,
            color_bands: vec![HueBand::new(0, 10), HueBand::new(170, 180), HueBand::new(90, 140)],
            min_saturation: 50,
            min_value: 50,
            mask_dilate_passes: 2,
            inpaint_radius: 3,
            dark_mode_threshold: 127.0,
            scale: 3.0,
            dark_binary_threshold: 190,
            blur_sigma: 0.8,
            skew_limit_deg: 5.0,
            skew_step_deg: 1.0,
            skew_min_deg: 0.5,
            pad: 50,
            fallback_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub language: String,
    /// Tesseract page segmentation mode; 6 assumes a uniform block of text.
    pub page_seg_mode: u8,
    pub data_path: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            page_seg_mode: 6,
            data_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NerConfig {
    /// Primary entity model (STUDENT_NAME / MAJOR / GPA).
    pub model_path: Option<PathBuf>,
    /// General-purpose model used to confirm PERSON candidates.
    pub validator_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub min_name_len: usize,
    pub min_major_len: usize,
    /// Tokens that mark a "major" as a UI label or test artifact when they
    /// appear anywhere in it, case-insensitively.
    pub major_denylist: Vec<String>,
    /// Words masked out before the denylist check, for real majors that
    /// happen to contain a denylisted token ("Modern" contains "mode").
    pub major_allowlist: Vec<String>,
    /// Known OCR misreadings of a first name, keyed case-insensitively.
    pub name_corrections: BTreeMap<String, String>,
}

const DEFAULT_MAJOR_DENYLIST: &[&str] = &[
    "skewed", "skew", "skewd", "image", "img", "test", "tests", "case", "simple", "mode",
    "label", "labels", "clean", "baseline", "no labels", "no label", "inverted", "invert",
    "colors", "colours", "color",
];

const DEFAULT_MAJOR_ALLOWLIST: &[&str] = &["modern", "modeling", "modelling"];

const DEFAULT_NAME_CORRECTIONS: &[&str] =
    &["joha", "jyonn", "jonn", "jon", "jhn", "joan", "johnn", "jiohn"];

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_name_len: 3,
            min_major_len: 3,
            major_denylist: DEFAULT_MAJOR_DENYLIST.iter().map(|s| s.to_string()).collect(),
            major_allowlist: DEFAULT_MAJOR_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
            name_corrections: DEFAULT_NAME_CORRECTIONS
                .iter()
                .map(|s| (s.to_string(), "John".to_string()))
                .collect(),
        }
    }
}
