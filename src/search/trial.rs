use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::Objective;
use crate::training::TrainOutcome;

/// One point of the search space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub index: usize,
    pub params: BTreeMap<String, Value>,
}

impl Trial {
    pub fn new(index: usize, params: BTreeMap<String, Value>) -> Self {
        Self { index, params }
    }

    pub fn name(&self) -> String {
        format!("trial_{:03}", self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Training command exited successfully
    Completed,
    /// Training command ran but exited unsuccessfully
    Failed,
    /// Training command could not be run at all
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial: Trial,
    pub status: TrialStatus,
    pub gpu: Option<usize>,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub duration_secs: f64,
    pub error: Option<String>,
}

impl TrialResult {
    pub fn from_outcome(trial: Trial, gpu: Option<usize>, outcome: TrainOutcome) -> Self {
        let status = if outcome.success() {
            TrialStatus::Completed
        } else {
            TrialStatus::Failed
        };
        Self {
            trial,
            status,
            gpu,
            exit_code: outcome.exit_code,
            metrics: outcome.metrics,
            duration_secs: outcome.duration_secs,
            error: None,
        }
    }

    pub fn errored(trial: Trial, gpu: Option<usize>, error: String) -> Self {
        Self {
            trial,
            status: TrialStatus::Errored,
            gpu,
            exit_code: None,
            metrics: BTreeMap::new(),
            duration_secs: 0.0,
            error: Some(error),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Outcome of a whole sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub experiment: String,
    pub objective: Objective,
    pub results: Vec<TrialResult>,
    /// Trial index of the best completed trial
    pub best: Option<usize>,
}

impl SweepReport {
    pub fn new(experiment: &str, objective: Objective, mut results: Vec<TrialResult>) -> Self {
        results.sort_by_key(|r| r.trial.index);
        let best = best_trial(&results, &objective).map(|r| r.trial.index);
        Self {
            experiment: experiment.to_string(),
            objective,
            results,
            best,
        }
    }

    pub fn completed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TrialStatus::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.completed()
    }

    pub fn best_result(&self) -> Option<&TrialResult> {
        let best = self.best?;
        self.results.iter().find(|r| r.trial.index == best)
    }
}

/// Best completed trial that reported the objective metric
pub fn best_trial<'a>(results: &'a [TrialResult], objective: &Objective) -> Option<&'a TrialResult> {
    results
        .iter()
        .filter(|r| r.status == TrialStatus::Completed)
        .filter_map(|r| r.metric(&objective.metric).filter(|v| v.is_finite()).map(|v| (r, v)))
        .fold(None, |best: Option<(&TrialResult, f64)>, (r, v)| match best {
            Some((_, current)) if !objective.is_better(v, current) => best,
            _ => Some((r, v)),
        })
        .map(|(r, _)| r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Direction;

    fn result(index: usize, status: TrialStatus, loss: Option<f64>) -> TrialResult {
        let mut metrics = BTreeMap::new();
        if let Some(loss) = loss {
            metrics.insert("val_loss".to_string(), loss);
        }
        TrialResult {
            trial: Trial::new(index, BTreeMap::new()),
            status,
            gpu: None,
            exit_code: Some(0),
            metrics,
            duration_secs: 1.0,
            error: None,
        }
    }

    #[test]
    fn test_trial_name() {
        assert_eq!(Trial::new(7, BTreeMap::new()).name(), "trial_007");
    }

    #[test]
    fn test_report_picks_best_completed_trial() {
        let results = vec![
            result(2, TrialStatus::Completed, Some(0.4)),
            result(0, TrialStatus::Completed, Some(0.5)),
            result(1, TrialStatus::Failed, Some(0.1)),
            result(3, TrialStatus::Completed, None),
        ];
        let report = SweepReport::new("exp", Objective::default(), results);

        assert_eq!(report.best, Some(2));
        assert_eq!(report.completed(), 3);
        assert_eq!(report.failed(), 1);
        let indices: Vec<usize> = report.results.iter().map(|r| r.trial.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_report_maximize() {
        let objective = Objective {
            metric: "val_loss".to_string(),
            direction: Direction::Maximize,
        };
        let results = vec![
            result(0, TrialStatus::Completed, Some(0.4)),
            result(1, TrialStatus::Completed, Some(0.5)),
        ];
        let report = SweepReport::new("exp", objective, results);
        assert_eq!(report.best_result().map(|r| r.trial.index), Some(1));
    }

    #[test]
    fn test_no_best_without_metric() {
        let results = vec![result(0, TrialStatus::Completed, None)];
        let report = SweepReport::new("exp", Objective::default(), results);
        assert!(report.best.is_none());
    }
}
