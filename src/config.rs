use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::annotate::DEFAULT_LABEL_FONT;
use crate::api::{ApiConfig, DEFAULT_API_ADDR, DEFAULT_SNAPSHOT_PATH};
use crate::detect::{BackendKind, ModelSettings};
use crate::feedback::{FeedbackKind, FeedbackSettings, HatSettings};
use crate::frame::{FramePrep, DEFAULT_RESIZE_WIDTH};
use crate::ingest::SourceConfig;
use crate::stream::DEFAULT_JPEG_QUALITY;

pub const CONFIG_ENV: &str = "MASKWATCH_CONFIG";

const DEFAULT_SOURCE: &str = "/dev/video0";
const DEFAULT_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FALLBACK_IMAGE: &str = "static/logo.jpeg";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MaskwatchConfigFile {
    api: Option<ApiConfigFile>,
    source: Option<SourceConfigFile>,
    models: Option<ModelsConfigFile>,
    stream: Option<StreamConfigFile>,
    feedback: Option<FeedbackConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    backend: Option<String>,
    face_dir: Option<PathBuf>,
    mask_model: Option<PathBuf>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    flip_vertical: Option<bool>,
    /// `0` keeps the captured size.
    resize_width: Option<u32>,
    jpeg_quality: Option<u8>,
    fallback_image: Option<PathBuf>,
    /// TrueType font for labels. Empty selects the bitmap font.
    label_font: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct FeedbackConfigFile {
    kind: Option<String>,
    pwm_chip: Option<String>,
    pwm_channel: Option<u32>,
    i2c_bus: Option<String>,
    display_addr: Option<u16>,
}

/// Encoding and frame preparation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub flip_vertical: bool,
    pub resize_width: Option<u32>,
    pub jpeg_quality: u8,
    pub fallback_image: PathBuf,
    pub label_font: Option<PathBuf>,
}

impl StreamSettings {
    pub fn frame_prep(&self) -> FramePrep {
        FramePrep {
            flip_vertical: self.flip_vertical,
            resize_width: self.resize_width,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaskwatchConfig {
    pub api: ApiConfig,
    pub source: SourceConfig,
    pub models: ModelSettings,
    pub stream: StreamSettings,
    pub feedback: FeedbackSettings,
}

/// Command-line values that win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub face_dir: Option<PathBuf>,
    pub mask_model: Option<PathBuf>,
    pub min_confidence: Option<f32>,
    pub source: Option<String>,
    pub addr: Option<String>,
    pub backend: Option<String>,
    pub feedback: Option<String>,
    pub flip_vertical: bool,
}

impl MaskwatchConfig {
    /// File named by `MASKWATCH_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => MaskwatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MaskwatchConfigFile) -> Result<Self> {
        let api_file = file.api.unwrap_or_default();
        let api = ApiConfig {
            addr: api_file
                .addr
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            snapshot_path: api_file
                .snapshot_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
        };

        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            uri: source_file
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_FPS),
            max_frames: None,
        };

        let models_file = file.models.unwrap_or_default();
        let defaults = ModelSettings::default();
        let models = ModelSettings {
            backend: match models_file.backend {
                Some(name) => name.parse()?,
                None => defaults.backend,
            },
            face_dir: models_file.face_dir.unwrap_or(defaults.face_dir),
            mask_model: models_file.mask_model.unwrap_or(defaults.mask_model),
            min_confidence: models_file
                .min_confidence
                .unwrap_or(defaults.min_confidence),
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            flip_vertical: stream_file.flip_vertical.unwrap_or(false),
            resize_width: match stream_file.resize_width {
                Some(0) => None,
                Some(width) => Some(width),
                None => Some(DEFAULT_RESIZE_WIDTH),
            },
            jpeg_quality: stream_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            fallback_image: stream_file
                .fallback_image
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FALLBACK_IMAGE)),
            label_font: match stream_file.label_font {
                Some(path) if path.as_os_str().is_empty() => None,
                Some(path) => Some(path),
                None => Some(PathBuf::from(DEFAULT_LABEL_FONT)),
            },
        };

        let feedback_file = file.feedback.unwrap_or_default();
        let hat_defaults = HatSettings::default();
        let feedback = FeedbackSettings {
            kind: match feedback_file.kind {
                Some(name) => name.parse()?,
                None => FeedbackKind::Log,
            },
            hat: HatSettings {
                pwm_chip: feedback_file.pwm_chip.unwrap_or(hat_defaults.pwm_chip),
                pwm_channel: feedback_file.pwm_channel.unwrap_or(hat_defaults.pwm_channel),
                i2c_bus: feedback_file.i2c_bus.unwrap_or(hat_defaults.i2c_bus),
                display_addr: feedback_file
                    .display_addr
                    .unwrap_or(hat_defaults.display_addr),
            },
        };

        Ok(Self {
            api,
            source,
            models,
            stream,
            feedback,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("MASKWATCH_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(path) = env_value("MASKWATCH_SNAPSHOT_PATH") {
            self.api.snapshot_path = PathBuf::from(path);
        }
        if let Some(uri) = env_value("MASKWATCH_SOURCE") {
            self.source.uri = uri;
        }
        if let Some(dir) = env_value("MASKWATCH_FACE_DIR") {
            self.models.face_dir = PathBuf::from(dir);
        }
        if let Some(model) = env_value("MASKWATCH_MASK_MODEL") {
            self.models.mask_model = PathBuf::from(model);
        }
        if let Some(confidence) = env_value("MASKWATCH_MIN_CONFIDENCE") {
            self.models.min_confidence = confidence.parse().map_err(|_| {
                anyhow!("MASKWATCH_MIN_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Some(kind) = env_value("MASKWATCH_FEEDBACK") {
            self.feedback.kind = kind.parse()?;
        }
        Ok(())
    }

    /// Apply command-line values and re-check the result.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(dir) = &overrides.face_dir {
            self.models.face_dir = dir.clone();
        }
        if let Some(model) = &overrides.mask_model {
            self.models.mask_model = model.clone();
        }
        if let Some(confidence) = overrides.min_confidence {
            self.models.min_confidence = confidence;
        }
        if let Some(uri) = &overrides.source {
            self.source.uri = uri.clone();
        }
        if let Some(addr) = &overrides.addr {
            self.api.addr = addr.clone();
        }
        if let Some(backend) = &overrides.backend {
            self.models.backend = backend.parse::<BackendKind>()?;
        }
        if let Some(kind) = &overrides.feedback {
            self.feedback.kind = kind.parse()?;
        }
        if overrides.flip_vertical {
            self.stream.flip_vertical = true;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let confidence = self.models.min_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!(
                "minimum confidence must be within [0, 1], got {}",
                confidence
            ));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be within 1..=100, got {}",
                self.stream.jpeg_quality
            ));
        }
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("frame source must not be empty"));
        }
        if self.api.addr.trim().is_empty() {
            return Err(anyhow!("api address must not be empty"));
        }
        if self.api.snapshot_path.as_os_str().is_empty() {
            return Err(anyhow!("snapshot path must not be empty"));
        }
        if self.models.backend == BackendKind::Tract
            && (self.models.face_dir.as_os_str().is_empty()
                || self.models.mask_model.as_os_str().is_empty())
        {
            return Err(anyhow!("model paths must not be empty"));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<MaskwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
