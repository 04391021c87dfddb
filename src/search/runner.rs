use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{mpsc, Mutex};
use std::thread;
use tracing::{error, info, warn};

use crate::config::HParams;
use crate::error::LaunchResult;
use crate::record::{clear_sweep_records, save_trial_result};
use crate::search::space::generate_trials;
use crate::search::trial::{SweepReport, Trial, TrialResult};
use crate::training::{Trainer, TrialContext};

/// Parallel hyperparameter search entry points
pub trait Sweeper {
    /// Run `nb_trials` trials on `nb_workers` CPU workers
    fn optimize_parallel_cpu(
        &self,
        trainer: &dyn Trainer,
        hparams: &HParams,
        nb_trials: usize,
        nb_workers: usize,
    ) -> LaunchResult<SweepReport>;

    /// Run `nb_trials` trials with one worker pinned to each GPU id
    fn optimize_parallel_gpu(
        &self,
        trainer: &dyn Trainer,
        hparams: &HParams,
        nb_trials: usize,
        gpus: &[usize],
    ) -> LaunchResult<SweepReport>;
}

/// Worker pool on the local machine
#[derive(Debug, Clone, Default)]
pub struct LocalSweeper {
    record_dir: Option<PathBuf>,
}

impl LocalSweeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write each trial result under `dir` as it finishes
    pub fn with_record_dir(mut self, dir: PathBuf) -> Self {
        self.record_dir = Some(dir);
        self
    }

    fn trials(&self, hparams: &HParams, nb_trials: usize) -> LaunchResult<Vec<Trial>> {
        let search = &hparams.search;
        generate_trials(&search.space, search.strategy, nb_trials, search.seed)
    }

    /// Drain `trials` with one thread per slot; a slot is an optional GPU id
    fn run(
        &self,
        trainer: &dyn Trainer,
        hparams: &HParams,
        trials: Vec<Trial>,
        slots: Vec<Option<usize>>,
    ) -> SweepReport {
        info!(
            "Sweep '{}': {} trial(s) on {} worker(s)",
            hparams.experiment.name,
            trials.len(),
            slots.len()
        );

        if let Some(dir) = &self.record_dir {
            if let Err(e) = clear_sweep_records(dir) {
                warn!("Failed to clear earlier records in {:?}: {:#}", dir, e);
            }
        }

        let queue = Mutex::new(VecDeque::from(trials));
        let (tx, rx) = mpsc::channel();

        thread::scope(|scope| {
            for gpu in slots {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || loop {
                    let next = match queue.lock() {
                        Ok(mut queue) => queue.pop_front(),
                        Err(_) => {
                            error!("Trial queue poisoned; worker exiting");
                            break;
                        }
                    };
                    let Some(trial) = next else { break };

                    let result = self.run_trial(trainer, hparams, trial, gpu);
                    if tx.send(result).is_err() {
                        break;
                    }
                });
            }
        });
        drop(tx);

        let results: Vec<TrialResult> = rx.into_iter().collect();
        let report = SweepReport::new(
            &hparams.experiment.name,
            hparams.search.objective.clone(),
            results,
        );

        info!(
            "Sweep '{}' done: {} completed, {} failed",
            report.experiment,
            report.completed(),
            report.failed()
        );
        if let Some(best) = report.best_result() {
            info!(
                "Best trial {}: {}={:?} params={}",
                best.trial.index,
                report.objective.metric,
                best.metric(&report.objective.metric),
                serde_json::to_string(&best.trial.params).unwrap_or_default()
            );
        }

        report
    }

    fn run_trial(
        &self,
        trainer: &dyn Trainer,
        hparams: &HParams,
        trial: Trial,
        gpu: Option<usize>,
    ) -> TrialResult {
        let trial_hparams = hparams.with_overrides(&trial.params);
        let ctx = TrialContext::trial(trial.index, gpu);

        let result = match trainer.train(&trial_hparams, &ctx) {
            Ok(outcome) => TrialResult::from_outcome(trial, gpu, outcome),
            Err(e) => {
                error!("Trial {} could not run: {}", trial.index, e);
                TrialResult::errored(trial, gpu, e.to_string())
            }
        };

        if let Some(dir) = &self.record_dir {
            if let Err(e) = save_trial_result(dir, &result) {
                warn!("Failed to record trial {}: {:#}", result.trial.index, e);
            }
        }

        result
    }
}

impl Sweeper for LocalSweeper {
    fn optimize_parallel_cpu(
        &self,
        trainer: &dyn Trainer,
        hparams: &HParams,
        nb_trials: usize,
        nb_workers: usize,
    ) -> LaunchResult<SweepReport> {
        let trials = self.trials(hparams, nb_trials)?;
        let workers = nb_workers.max(1).min(trials.len().max(1));
        Ok(self.run(trainer, hparams, trials, vec![None; workers]))
    }

    fn optimize_parallel_gpu(
        &self,
        trainer: &dyn Trainer,
        hparams: &HParams,
        nb_trials: usize,
        gpus: &[usize],
    ) -> LaunchResult<SweepReport> {
        if gpus.is_empty() {
            warn!("GPU sweep requested without GPUs; falling back to one CPU worker");
            return self.optimize_parallel_cpu(trainer, hparams, nb_trials, 1);
        }
        let trials = self.trials(hparams, nb_trials)?;
        let slots = gpus.iter().copied().take(trials.len()).map(Some).collect();
        Ok(self.run(trainer, hparams, trials, slots))
    }
}
