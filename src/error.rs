use thiserror::Error;

/// Errors surfaced by the launcher seams (config, trainer, sweeper)
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid GPU specification '{spec}': {reason}")]
    InvalidGpuSpec { spec: String, reason: String },

    #[error("Invalid search space: {0}")]
    SearchSpace(String),

    #[error("Failed to launch training command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Training run failed (exit code: {exit_code:?})")]
    TrainingFailed { exit_code: Option<i32> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type LaunchResult<T> = Result<T, LaunchError>;
