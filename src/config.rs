use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::backends::cpu::{DEFAULT_GRID, DEFAULT_LUMA_THRESHOLD};
use crate::recognizer::{RecognizerSettings, ResultOrder};

const DEFAULT_MODELS_DIR: &str = "models";
const DEFAULT_INPUT_SIZE: u32 = 224;
const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Deserialize, Default)]
struct RecognizerConfigFile {
    models_dir: Option<PathBuf>,
    result_order: Option<String>,
    join_timeout_ms: Option<u64>,
    models: Option<Vec<ModelConfigFile>>,
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    name: String,
    kind: String,
    path: Option<PathBuf>,
    labels: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    top_k: Option<usize>,
    threshold: Option<f32>,
    grid: Option<u32>,
}

/// Backend implementation a configured model uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    /// ONNX classifier (requires the `backend-tract` feature).
    OnnxClassifier,
    /// CPU bright-region localizer.
    LumaLocalizer,
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "onnx-classifier" | "onnx" => Ok(ModelKind::OnnxClassifier),
            "luma-localizer" | "luma" => Ok(ModelKind::LumaLocalizer),
            other => Err(anyhow!(
                "unknown model kind '{}' (expected onnx-classifier or luma-localizer)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    pub kind: ModelKind,
    /// Model file, relative to `models_dir` unless absolute.
    pub path: Option<PathBuf>,
    /// Labels file, relative to `models_dir` unless absolute.
    pub labels: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub top_k: usize,
    pub threshold: f32,
    pub grid: u32,
}

#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub models_dir: PathBuf,
    pub result_order: ResultOrder,
    pub join_timeout: Option<Duration>,
    pub models: Vec<ModelSpec>,
}

impl RecognizerConfig {
    /// Load from `RECOGNIZER_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RECOGNIZER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RecognizerConfigFile) -> Result<Self> {
        let models_dir = file
            .models_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR));
        let result_order = match file.result_order.as_deref() {
            Some(order) => order.parse()?,
            None => ResultOrder::default(),
        };
        let join_timeout = file
            .join_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let models = file
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|model| -> Result<ModelSpec> {
                Ok(ModelSpec {
                    kind: model.kind.parse()?,
                    name: model.name,
                    path: model.path,
                    labels: model.labels,
                    width: model.width.unwrap_or(DEFAULT_INPUT_SIZE),
                    height: model.height.unwrap_or(DEFAULT_INPUT_SIZE),
                    top_k: model.top_k.unwrap_or(DEFAULT_TOP_K),
                    threshold: model.threshold.unwrap_or(DEFAULT_LUMA_THRESHOLD),
                    grid: model.grid.unwrap_or(DEFAULT_GRID),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            models_dir,
            result_order,
            join_timeout,
            models,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("RECOGNIZER_MODELS_DIR") {
            if !dir.trim().is_empty() {
                self.models_dir = PathBuf::from(dir);
            }
        }
        if let Ok(order) = std::env::var("RECOGNIZER_RESULT_ORDER") {
            if !order.trim().is_empty() {
                self.result_order = order.parse()?;
            }
        }
        if let Ok(timeout) = std::env::var("RECOGNIZER_JOIN_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("RECOGNIZER_JOIN_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.join_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(anyhow!("model name must not be empty"));
            }
            if !seen.insert(model.name.as_str()) {
                return Err(anyhow!("duplicate model name '{}'", model.name));
            }
            if !(0.0..=1.0).contains(&model.threshold) {
                return Err(anyhow!(
                    "model '{}': threshold must be within [0, 1]",
                    model.name
                ));
            }
            if model.grid == 0 {
                return Err(anyhow!("model '{}': grid must be >= 1", model.name));
            }
            if model.top_k == 0 {
                return Err(anyhow!("model '{}': top_k must be >= 1", model.name));
            }
            if model.width == 0 || model.height == 0 {
                return Err(anyhow!(
                    "model '{}': input size must be non-zero",
                    model.name
                ));
            }
        }
        Ok(())
    }

    /// Resolve a model-relative path against `models_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.models_dir.join(path)
        }
    }

    pub fn settings(&self) -> RecognizerSettings {
        RecognizerSettings {
            result_order: self.result_order,
            join_timeout: self.join_timeout,
        }
    }
}

fn read_config_file(path: &Path) -> Result<RecognizerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: RecognizerConfigFile = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
