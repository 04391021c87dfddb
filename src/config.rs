use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LaunchError, LaunchResult};
use crate::gpu::GpuSpec;
use crate::search::{validate_space, Strategy, TunableParam};

/// What a launch does with its hyperparameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Single training run
    #[default]
    Default,
    /// Parallel hyperparameter sweep
    #[serde(alias = "hparams-search")]
    #[value(name = "hparams_search", alias = "hparams-search")]
    HparamsSearch,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Default => write!(f, "default"),
            Mode::HparamsSearch => write!(f, "hparams_search"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Minimize,
    Maximize,
}

/// Metric used to rank finished trials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Objective {
    pub metric: String,
    pub direction: Direction,
}

impl Default for Objective {
    fn default() -> Self {
        Self {
            metric: "val_loss".to_string(),
            direction: Direction::Minimize,
        }
    }
}

impl Objective {
    /// True when `candidate` beats `current` under this objective
    pub fn is_better(&self, candidate: f64, current: f64) -> bool {
        match self.direction {
            Direction::Minimize => candidate < current,
            Direction::Maximize => candidate > current,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub nb_trials: usize,
    pub nb_workers: usize,
    pub strategy: Strategy,
    pub seed: Option<u64>,
    pub objective: Objective,
    pub space: Vec<TunableParam>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            nb_trials: 20,
            nb_workers: 1,
            strategy: Strategy::GridSearch,
            seed: None,
            objective: Objective::default(),
            space: Vec::new(),
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> LaunchResult<()> {
        if self.nb_trials == 0 {
            return Err(LaunchError::Config("nb_trials must be > 0".to_string()));
        }
        if self.nb_workers == 0 {
            return Err(LaunchError::Config("nb_workers must be > 0".to_string()));
        }
        if self.objective.metric.trim().is_empty() {
            return Err(LaunchError::Config("objective metric must not be empty".to_string()));
        }
        validate_space(&self.space)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub name: String,
    pub log_dir: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "emotion_transformer".to_string(),
            log_dir: PathBuf::from("runs"),
        }
    }
}

impl ExperimentConfig {
    /// Directory holding this experiment's trial records
    pub fn record_dir(&self) -> PathBuf {
        self.log_dir.join(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Program followed by its fixed arguments
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Append `--gpus <n>` to the training command
    pub pass_gpus: bool,
    /// Regex with two groups (name, value) matched against child stdout
    pub metric_pattern: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            env: BTreeMap::new(),
            pass_gpus: true,
            metric_pattern: default_metric_pattern(),
        }
    }
}

fn default_metric_pattern() -> String {
    r"^\s*([A-Za-z_][\w./-]*)\s*[=:]\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*$".to_string()
}

/// Parsed hyperparameters for one launch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HParams {
    pub mode: Mode,
    pub gpus: GpuSpec,
    /// Forwarded verbatim to the training command
    pub params: BTreeMap<String, Value>,
    pub search: SearchConfig,
    pub experiment: ExperimentConfig,
    pub trainer: TrainerConfig,
}

impl HParams {
    pub fn load(path: &Path) -> LaunchResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            LaunchError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            LaunchError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Set a forwarded parameter; `raw` is read as JSON, else kept as a string
    pub fn set_param(&mut self, key: &str, raw: &str) {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        self.params.insert(key.to_string(), value);
    }

    /// Copy of these hyperparameters with `overrides` merged over `params`
    pub fn with_overrides(&self, overrides: &BTreeMap<String, Value>) -> Self {
        let mut merged = self.clone();
        for (key, value) in overrides {
            merged.params.insert(key.clone(), value.clone());
        }
        merged
    }

    pub fn validate(&self) -> LaunchResult<()> {
        if self.experiment.name.trim().is_empty() {
            return Err(LaunchError::Config("experiment name must not be empty".to_string()));
        }
        if self.params.keys().any(|k| k.trim().is_empty()) {
            return Err(LaunchError::Config("parameter names must not be empty".to_string()));
        }
        self.search.validate()
    }
}

impl fmt::Display for HParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={} gpus={} params={} experiment={}",
            self.mode,
            self.gpus,
            serde_json::to_string(&self.params).unwrap_or_default(),
            self.experiment.name
        )
    }
}
