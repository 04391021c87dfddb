use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::HParams;
use crate::error::LaunchResult;

/// Where a training run executes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialContext {
    /// `None` for a plain single run
    pub trial_index: Option<usize>,
    pub gpu_ids: Vec<usize>,
}

impl TrialContext {
    pub fn single(gpu_ids: Vec<usize>) -> Self {
        Self {
            trial_index: None,
            gpu_ids,
        }
    }

    pub fn trial(index: usize, gpu: Option<usize>) -> Self {
        Self {
            trial_index: Some(index),
            gpu_ids: gpu.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    /// `None` when the run was killed by a signal
    pub exit_code: Option<i32>,
    pub metrics: BTreeMap<String, f64>,
    pub duration_secs: f64,
}

impl TrainOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Training entry point invoked with one set of hyperparameters.
///
/// Implementations report spawn or I/O problems as `Err`; a run that
/// starts and then fails comes back as an unsuccessful `TrainOutcome`.
pub trait Trainer: Send + Sync {
    fn train(&self, hparams: &HParams, ctx: &TrialContext) -> LaunchResult<TrainOutcome>;
}
