mod command;
mod trainer;

pub use command::{CommandTrainer, TRIAL_INDEX_ENV};
pub use trainer::{TrainOutcome, Trainer, TrialContext};
