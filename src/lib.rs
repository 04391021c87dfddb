// Library exports for use in scripts and other binaries

pub mod config;
pub mod error;
pub mod gpu;
pub mod launcher;
pub mod record;
pub mod search;
pub mod training;

// Re-export commonly used types
pub use config::{HParams, Mode};
pub use error::{LaunchError, LaunchResult};
pub use gpu::GpuSpec;
pub use launcher::{dispatch, LaunchOutcome};
pub use search::{LocalSweeper, SweepReport, Sweeper};
pub use training::{CommandTrainer, Trainer};
