use std::env;
use std::fs;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

/// Default config file, overridable via `CLASSIFIER_CONFIG`.
pub const DEFAULT_CONFIG_PATH: &str = "classifier.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// Pixel scaling applied after decode (e.g. 1/255).
    pub scale: f32,
    /// Optional per-channel mean, subtracted after scaling.
    pub mean: Option<Vec<f32>>,
    /// Optional per-channel std, divided after mean subtraction.
    pub std: Option<Vec<f32>>,
}

impl InputSpec {
    /// Checks a tensor shape against the expected `[1, C, H, W]` layout.
    pub fn validate(&self, shape: &[usize]) -> Result<(), ClassifierError> {
        let expected = [1, self.channels, self.height, self.width];
        if shape != expected {
            return Err(ClassifierError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: shape.to_vec(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelCfg {
    pub backend: String,
    pub model_path: String,
    pub labels_path: String,
    #[serde(default)]
    pub model_name: Option<String>,

    pub input_names: Vec<String>,
    pub input_shapes: Vec<Vec<usize>>,
    pub output_names: Vec<String>,
    pub output_shapes: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputCfg {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub mean: Option<Vec<f32>>,
    #[serde(default)]
    pub std: Option<Vec<f32>>,
}

fn default_scale() -> f32 {
    1.0 / 255.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerCfg {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Ranked alternatives returned alongside the top label.
    #[serde(default = "default_topk")]
    pub topk: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_topk() -> usize {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub model: ModelCfg,
    pub input: InputCfg,
    pub server: ServerCfg,
}

impl Config {
    /// Reads the config file named by `CLASSIFIER_CONFIG` (or the default
    /// path) and applies environment overrides.
    pub fn load() -> anyhow::Result<Config> {
        let path =
            env::var("CLASSIFIER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let raw =
            fs::read_to_string(&path).with_context(|| format!("cannot read config file {path}"))?;
        let mut cfg: Config =
            toml::from_str(&raw).with_context(|| format!("cannot parse config file {path}"))?;
        cfg.apply_env_overrides()?;
        cfg.check()?;
        Ok(cfg)
    }

    /// `CLASSIFIER_MODEL_PATH`, `CLASSIFIER_LABELS_PATH` and
    /// `CLASSIFIER_PORT` take precedence over the file.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(path) = env::var("CLASSIFIER_MODEL_PATH") {
            self.model.model_path = path;
        }
        if let Ok(path) = env::var("CLASSIFIER_LABELS_PATH") {
            self.model.labels_path = path;
        }
        if let Ok(port) = env::var("CLASSIFIER_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("CLASSIFIER_PORT is not a port number: {port}"))?;
        }
        Ok(())
    }

    fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.input.channels == 1 || self.input.channels == 3,
            "input.channels must be 1 (grayscale) or 3 (RGB), got {}",
            self.input.channels
        );
        anyhow::ensure!(
            self.model.input_names.len() == self.model.input_shapes.len(),
            "model.input_names and model.input_shapes differ in length"
        );
        anyhow::ensure!(
            self.model.output_names.len() == self.model.output_shapes.len(),
            "model.output_names and model.output_shapes differ in length"
        );
        anyhow::ensure!(
            !self.model.output_shapes.is_empty() && !self.model.output_shapes[0].is_empty(),
            "model.output_shapes must declare at least one output"
        );
        if let Some(mean) = &self.input.mean {
            anyhow::ensure!(
                mean.len() == self.input.channels,
                "input.mean length {} does not match channels {}",
                mean.len(),
                self.input.channels
            );
        }
        if let Some(std) = &self.input.std {
            anyhow::ensure!(
                std.len() == self.input.channels,
                "input.std length {} does not match channels {}",
                std.len(),
                self.input.channels
            );
        }
        Ok(())
    }

    pub fn input_spec(&self) -> InputSpec {
        InputSpec {
            channels: self.input.channels,
            height: self.input.height,
            width: self.input.width,
            scale: self.input.scale,
            mean: self.input.mean.clone(),
            std: self.input.std.clone(),
        }
    }

    /// Output dimensionality of the primary model output, i.e. the class
    /// count the label vocabulary must match.
    pub fn output_classes(&self) -> usize {
        *self.model.output_shapes[0].last().unwrap_or(&0)
    }

    pub fn model_name(&self) -> String {
        self.model
            .model_name
            .clone()
            .unwrap_or_else(|| "fruit-classifier".to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }
}

// Wire types

/// Classification outcome produced by the postprocessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    pub top: Vec<Ranked>,
}

/// One ranked alternative in a prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ranked {
    pub label: String,
    pub confidence: f32,
}
