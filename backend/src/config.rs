use serde::{Deserialize, Serialize};
use shared::{DrawingKind, InputShape};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::imaging::{NormalizationSpec, ResizePolicy};
use crate::inference::{OutputKind, TensorLayout};
use crate::report::ConfidenceThresholds;

pub const CONFIG_ENV: &str = "SPIRALSCAN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/spiralscan.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub report: ReportConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5003,
            workers: None,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub directory: PathBuf,
    pub spiral: ModelSpec,
    pub wave: ModelSpec,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("models"),
            spiral: ModelSpec::with_input("spiral.pt", InputShape::new(256, 256, 1)),
            wave: ModelSpec::with_input("wave.pt", InputShape::new(550, 250, 1)),
        }
    }
}

impl ModelsConfig {
    pub fn spec(&self, kind: DrawingKind) -> &ModelSpec {
        match kind {
            DrawingKind::Spiral => &self.spiral,
            DrawingKind::Wave => &self.wave,
        }
    }

    pub fn weights_path(&self, kind: DrawingKind) -> PathBuf {
        self.directory.join(&self.spec(kind).file)
    }
}

/// Everything needed to feed one classifier and interpret its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub file: String,
    pub input: InputShape,
    #[serde(default)]
    pub resize: ResizePolicy,
    #[serde(default = "default_invert")]
    pub invert: bool,
    #[serde(default)]
    pub mean: Option<Vec<f32>>,
    #[serde(default)]
    pub std: Option<Vec<f32>>,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_positive_label")]
    pub positive_label: String,
    /// Tie-break order for equal probabilities, highest priority first.
    #[serde(default = "default_labels")]
    pub label_priority: Vec<String>,
    #[serde(default)]
    pub output: OutputKind,
    #[serde(default)]
    pub layout: TensorLayout,
}

fn default_invert() -> bool {
    true
}

fn default_labels() -> Vec<String> {
    vec!["healthy".to_string(), "parkinson".to_string()]
}

fn default_positive_label() -> String {
    "parkinson".to_string()
}

impl ModelSpec {
    pub fn with_input(file: &str, input: InputShape) -> Self {
        Self {
            file: file.to_string(),
            input,
            resize: ResizePolicy::default(),
            invert: default_invert(),
            mean: None,
            std: None,
            labels: default_labels(),
            positive_label: default_positive_label(),
            label_priority: default_labels(),
            output: OutputKind::default(),
            layout: TensorLayout::default(),
        }
    }

    pub fn normalization(&self) -> NormalizationSpec {
        NormalizationSpec {
            resize: self.resize,
            invert: self.invert,
            mean: self.mean.clone(),
            std: self.std.clone(),
            ..NormalizationSpec::new(self.input)
        }
    }

    fn validate(&self, kind: DrawingKind) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(format!("{} model: {}", kind, msg)));

        if self.file.trim().is_empty() {
            return invalid("weight file name is empty".to_string());
        }
        if self.input.width == 0 || self.input.height == 0 {
            return invalid(format!("input shape {} has no pixels", self.input));
        }
        if !matches!(self.input.channels, 1 | 3) {
            return invalid(format!("unsupported channel count {}", self.input.channels));
        }
        match (&self.mean, &self.std) {
            (None, None) => {}
            (Some(mean), Some(deviation)) => {
                let channels = self.input.channels as usize;
                if mean.len() != channels || deviation.len() != channels {
                    return invalid(format!("mean/std need {} entries", channels));
                }
                if deviation.iter().any(|s| *s <= 0.0) {
                    return invalid("std entries must be positive".to_string());
                }
            }
            _ => return invalid("mean and std must be set together".to_string()),
        }

        let unique: HashSet<&String> = self.labels.iter().collect();
        if self.labels.is_empty() || unique.len() != self.labels.len() {
            return invalid("labels must be non-empty and unique".to_string());
        }
        if !self.labels.contains(&self.positive_label) {
            return invalid(format!("positive label '{}' is not a label", self.positive_label));
        }
        if let Some(unknown) = self.label_priority.iter().find(|l| !self.labels.contains(l)) {
            return invalid(format!("priority label '{}' is not a label", unknown));
        }
        if self.output == OutputKind::BinaryProbability && self.labels.len() != 2 {
            return invalid("binary_probability output needs exactly two labels".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub thresholds: ConfidenceThresholds,
    /// Positive-class score above which a drawing counts as positive in the
    /// self-test verdict.
    pub decision_threshold: f32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            thresholds: ConfidenceThresholds::default(),
            decision_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub reports_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
        }
    }
}

impl AppConfig {
    /// Loads the YAML config named by `SPIRALSCAN_CONFIG`, or the default
    /// path when present, then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => {
                log::warn!(
                    "No config file at {}, using built-in defaults",
                    DEFAULT_CONFIG_PATH
                );
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT '{}' is not a port", port)))?;
        }
        if let Some(address) = lookup("BIND_ADDRESS") {
            self.server.bind_address = address;
        }
        if let Some(size) = lookup("MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = size.parse().map_err(|_| {
                ConfigError::Invalid(format!("MAX_UPLOAD_BYTES '{}' is not a size", size))
            })?;
        }
        if let Some(dir) = lookup("MODEL_DIR") {
            self.models.directory = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("REPORTS_DIR") {
            self.storage.reports_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_upload_bytes must be positive".to_string(),
            ));
        }
        self.models.spiral.validate(DrawingKind::Spiral)?;
        self.models.wave.validate(DrawingKind::Wave)?;
        self.report
            .thresholds
            .validate()
            .map_err(ConfigError::Invalid)?;
        if !(0.0..=1.0).contains(&self.report.decision_threshold) {
            return Err(ConfigError::Invalid(format!(
                "decision_threshold {} outside [0, 1]",
                self.report.decision_threshold
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}
