mod runner;
mod space;
mod trial;

pub use runner::{LocalSweeper, Sweeper};
pub use space::{generate_trials, validate_space, ParamDomain, Strategy, TunableParam};
pub use trial::{best_trial, SweepReport, Trial, TrialResult, TrialStatus};
