use tracing::info;

use crate::config::{HParams, Mode};
use crate::error::{LaunchError, LaunchResult};
use crate::search::{SweepReport, Sweeper};
use crate::training::{TrainOutcome, Trainer, TrialContext};

#[derive(Debug, Clone)]
pub enum LaunchOutcome {
    Single(TrainOutcome),
    Sweep(SweepReport),
}

/// Branch on `hparams.mode`: one training run, or a CPU/GPU sweep
pub fn dispatch(
    hparams: &HParams,
    trainer: &dyn Trainer,
    sweeper: &dyn Sweeper,
) -> LaunchResult<LaunchOutcome> {
    hparams.validate()?;
    info!("Launching: {}", hparams);

    match hparams.mode {
        Mode::Default => {
            let ctx = TrialContext::single(hparams.gpus.device_ids());
            let outcome = trainer.train(hparams, &ctx)?;
            if !outcome.success() {
                return Err(LaunchError::TrainingFailed {
                    exit_code: outcome.exit_code,
                });
            }
            Ok(LaunchOutcome::Single(outcome))
        }
        Mode::HparamsSearch => {
            let search = &hparams.search;
            let report = if hparams.gpus.is_empty() {
                sweeper.optimize_parallel_cpu(trainer, hparams, search.nb_trials, search.nb_workers)?
            } else {
                let gpus = hparams.gpus.device_ids();
                sweeper.optimize_parallel_gpu(trainer, hparams, search.nb_trials, &gpus)?
            };
            Ok(LaunchOutcome::Sweep(report))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Objective;
    use crate::gpu::GpuSpec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTrainer {
        calls: Mutex<Vec<TrialContext>>,
        exit_code: Option<i32>,
    }

    impl Trainer for RecordingTrainer {
        fn train(&self, _hparams: &HParams, ctx: &TrialContext) -> LaunchResult<TrainOutcome> {
            self.calls.lock().unwrap().push(ctx.clone());
            Ok(TrainOutcome {
                exit_code: self.exit_code,
                ..TrainOutcome::default()
            })
        }
    }

    #[derive(Debug, PartialEq)]
    enum SweepCall {
        Cpu { nb_trials: usize, nb_workers: usize },
        Gpu { nb_trials: usize, gpus: Vec<usize> },
    }

    #[derive(Default)]
    struct RecordingSweeper {
        calls: Mutex<Vec<SweepCall>>,
    }

    impl Sweeper for RecordingSweeper {
        fn optimize_parallel_cpu(
            &self,
            _trainer: &dyn Trainer,
            hparams: &HParams,
            nb_trials: usize,
            nb_workers: usize,
        ) -> LaunchResult<SweepReport> {
            self.calls
                .lock()
                .unwrap()
                .push(SweepCall::Cpu { nb_trials, nb_workers });
            Ok(SweepReport::new(&hparams.experiment.name, Objective::default(), Vec::new()))
        }

        fn optimize_parallel_gpu(
            &self,
            _trainer: &dyn Trainer,
            hparams: &HParams,
            nb_trials: usize,
            gpus: &[usize],
        ) -> LaunchResult<SweepReport> {
            self.calls.lock().unwrap().push(SweepCall::Gpu {
                nb_trials,
                gpus: gpus.to_vec(),
            });
            Ok(SweepReport::new(&hparams.experiment.name, Objective::default(), Vec::new()))
        }
    }

    fn ok_trainer() -> RecordingTrainer {
        RecordingTrainer {
            exit_code: Some(0),
            ..RecordingTrainer::default()
        }
    }

    #[test]
    fn test_default_mode_trains_once() {
        let trainer = ok_trainer();
        let sweeper = RecordingSweeper::default();
        let hparams = HParams::default();

        let outcome = dispatch(&hparams, &trainer, &sweeper).unwrap();
        assert!(matches!(outcome, LaunchOutcome::Single(_)));

        let calls = trainer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], TrialContext::single(Vec::new()));
        assert!(sweeper.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_default_mode_passes_gpu_ids() {
        let trainer = ok_trainer();
        let sweeper = RecordingSweeper::default();
        let hparams = HParams {
            gpus: GpuSpec::Ids(vec![2, 5]),
            ..HParams::default()
        };

        dispatch(&hparams, &trainer, &sweeper).unwrap();
        assert_eq!(trainer.calls.lock().unwrap()[0].gpu_ids, vec![2, 5]);
    }

    #[test]
    fn test_default_mode_failure_is_an_error() {
        let trainer = RecordingTrainer {
            exit_code: Some(2),
            ..RecordingTrainer::default()
        };
        let sweeper = RecordingSweeper::default();

        let result = dispatch(&HParams::default(), &trainer, &sweeper);
        assert!(matches!(
            result,
            Err(LaunchError::TrainingFailed { exit_code: Some(2) })
        ));
    }

    #[test]
    fn test_search_without_gpus_uses_cpu_workers() {
        let trainer = ok_trainer();
        let sweeper = RecordingSweeper::default();
        let hparams = HParams {
            mode: Mode::HparamsSearch,
            ..HParams::default()
        };

        let outcome = dispatch(&hparams, &trainer, &sweeper).unwrap();
        assert!(matches!(outcome, LaunchOutcome::Sweep(_)));
        assert_eq!(
            *sweeper.calls.lock().unwrap(),
            vec![SweepCall::Cpu {
                nb_trials: 20,
                nb_workers: 1
            }]
        );
        assert!(trainer.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_search_with_gpu_count_uses_gpu_workers() {
        let trainer = ok_trainer();
        let sweeper = RecordingSweeper::default();
        let hparams = HParams {
            mode: Mode::HparamsSearch,
            gpus: GpuSpec::Count(3),
            ..HParams::default()
        };

        dispatch(&hparams, &trainer, &sweeper).unwrap();
        assert_eq!(
            *sweeper.calls.lock().unwrap(),
            vec![SweepCall::Gpu {
                nb_trials: 20,
                gpus: vec![0, 1, 2]
            }]
        );
    }

    #[test]
    fn test_search_with_gpu_ids_uses_those_ids() {
        let trainer = ok_trainer();
        let sweeper = RecordingSweeper::default();
        let hparams = HParams {
            mode: Mode::HparamsSearch,
            gpus: "1 4".parse().unwrap(),
            ..HParams::default()
        };

        dispatch(&hparams, &trainer, &sweeper).unwrap();
        assert_eq!(
            *sweeper.calls.lock().unwrap(),
            vec![SweepCall::Gpu {
                nb_trials: 20,
                gpus: vec![1, 4]
            }]
        );
    }

    #[test]
    fn test_invalid_hparams_launch_nothing() {
        let trainer = ok_trainer();
        let sweeper = RecordingSweeper::default();
        let mut hparams = HParams::default();
        hparams.search.nb_trials = 0;

        assert!(dispatch(&hparams, &trainer, &sweeper).is_err());
        assert!(trainer.calls.lock().unwrap().is_empty());
        assert!(sweeper.calls.lock().unwrap().is_empty());
    }
}
