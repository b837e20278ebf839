use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::analytics::{normalize_class_name, DecodeParams};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "HAZARDWATCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("model not found at {0}")]
    ModelNotFound(PathBuf),
    #[error("class threshold set for unknown class {0:?}")]
    UnknownClass(String),
    #[error("invalid setting: {0}")]
    Invalid(&'static str),
}

fn default_http_port() -> u16 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// End-to-end model emitting `[1, n, 6]` boxes.
    Preboxed,
    /// Raw `[1, h, w, 5 + classes]` grid needing thresholding and NMS.
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    Nchw,
    Nhwc,
}

fn default_output() -> OutputKind {
    OutputKind::Preboxed
}

fn default_input_layout() -> InputLayout {
    InputLayout::Nchw
}

fn default_input_size() -> u32 {
    640
}

fn default_pad_color() -> u8 {
    114
}

fn default_confidence_threshold() -> f32 {
    0.45
}

fn default_class_thresholds() -> HashMap<String, f32> {
    HashMap::from([
        ("FIRE".to_string(), 0.15),
        ("FALL".to_string(), 0.2),
        ("NOT FALL".to_string(), 0.1),
    ])
}

fn default_class_threshold() -> f32 {
    0.1
}

fn default_iou_threshold() -> f32 {
    0.3
}

fn default_max_detections() -> usize {
    20
}

fn default_class_names() -> Vec<String> {
    vec!["FIRE".into(), "FALL".into(), "NOT FALL".into()]
}

fn default_intra_threads() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    #[serde(default = "default_output")]
    pub output: OutputKind,
    #[serde(default = "default_input_layout")]
    pub input_layout: InputLayout,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_pad_color")]
    pub pad_color: u8,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Grid score thresholds keyed by class id or class name.
    #[serde(default = "default_class_thresholds")]
    pub class_thresholds: HashMap<String, f32>,
    #[serde(default = "default_class_threshold")]
    pub default_class_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

impl DetectorConfig {
    pub fn decode_params(&self) -> DecodeParams {
        let mut class_thresholds = vec![self.default_class_threshold; self.class_names.len()];
        for (key, threshold) in &self.class_thresholds {
            let Some(id) = self.class_id_for(key) else {
                continue;
            };
            if id >= class_thresholds.len() {
                class_thresholds.resize(id + 1, self.default_class_threshold);
            }
            class_thresholds[id] = *threshold;
        }

        DecodeParams {
            confidence_threshold: self.confidence_threshold,
            class_thresholds,
            default_class_threshold: self.default_class_threshold,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
            class_names: self.class_names.clone(),
        }
    }

    /// A `class_thresholds` key is either a class id (`"0"`) or a class name.
    fn class_id_for(&self, key: &str) -> Option<usize> {
        if let Ok(id) = key.trim().parse::<usize>() {
            return Some(id);
        }
        let wanted = normalize_class_name(key);
        self.class_names
            .iter()
            .position(|name| normalize_class_name(name) == wanted)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.input_size == 0 {
            return Err(ConfigError::Invalid("detector.input_size must be positive"));
        }
        if self.max_detections == 0 {
            return Err(ConfigError::Invalid("detector.max_detections must be positive"));
        }

        let mut seen = HashSet::new();
        for key in self.class_thresholds.keys() {
            let id = self
                .class_id_for(key)
                .ok_or_else(|| ConfigError::UnknownClass(key.clone()))?;
            if !seen.insert(id) {
                return Err(ConfigError::Invalid(
                    "detector.class_thresholds names the same class twice",
                ));
            }
        }
        Ok(())
    }
}

fn default_mailbox_capacity() -> usize {
    5
}

fn default_stale_after_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            stale_after_ms: default_stale_after_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_window() -> usize {
    6
}

fn default_required_match() -> usize {
    4
}

fn default_cooldown_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_required_match")]
    pub required_match: usize,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            required_match: default_required_match(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    pub detector: DetectorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(path)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        if !config.detector.model_path.exists() {
            return Err(ConfigError::ModelNotFound(config.detector.model_path));
        }

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;

        config.detector.validate()?;
        if config.pipeline.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid("pipeline.mailbox_capacity must be positive"));
        }
        if config.alerts.window == 0 || config.alerts.required_match == 0 {
            return Err(ConfigError::Invalid("alerts.window and alerts.required_match must be positive"));
        }
        if config.alerts.required_match > config.alerts.window {
            return Err(ConfigError::Invalid("alerts.required_match cannot exceed alerts.window"));
        }

        Ok(config)
    }
}
