use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use emotion_launch::config::{Direction, HParams, Mode};
use emotion_launch::gpu::GpuSpec;
use emotion_launch::record::save_sweep_summary;
use emotion_launch::search::{generate_trials, Strategy};
use emotion_launch::{dispatch, CommandTrainer, LaunchOutcome, LocalSweeper};

#[derive(Debug, Parser)]
#[command(author, version, about = "Emotion model training launcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Train once, or sweep hyperparameters across CPU/GPU workers
    Run(RunArgs),
    /// Print the trials a sweep would run, without launching anything
    Plan(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Path to configuration JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// GPU count (`2`) or device ids (`"0 3"`, `"1,"`); `0` runs on CPU
    #[arg(long)]
    gpus: Option<GpuSpec>,

    #[arg(long)]
    nb_trials: Option<usize>,

    #[arg(long)]
    nb_workers: Option<usize>,

    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    #[arg(long)]
    seed: Option<u64>,

    /// Metric used to rank sweep trials
    #[arg(long)]
    metric: Option<String>,

    #[arg(long, value_enum)]
    direction: Option<Direction>,

    #[arg(long)]
    experiment: Option<String>,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Forwarded hyperparameter, value read as JSON when possible
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    set: Vec<(String, String)>,

    /// Training command, e.g. `-- python train.py`
    #[arg(last = true)]
    command: Vec<String>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_command(args),
        Commands::Plan(args) => plan_command(args),
    }
}

/// Defaults, then the config file, then flags
fn build_hparams(args: RunArgs) -> Result<HParams> {
    let mut hparams = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            HParams::load(path)?
        }
        None => HParams::default(),
    };

    if let Some(mode) = args.mode {
        hparams.mode = mode;
    }
    if let Some(gpus) = args.gpus {
        hparams.gpus = gpus;
    }
    if let Some(nb_trials) = args.nb_trials {
        hparams.search.nb_trials = nb_trials;
    }
    if let Some(nb_workers) = args.nb_workers {
        hparams.search.nb_workers = nb_workers;
    }
    if let Some(strategy) = args.strategy {
        hparams.search.strategy = strategy;
    }
    if args.seed.is_some() {
        hparams.search.seed = args.seed;
    }
    if let Some(metric) = args.metric {
        hparams.search.objective.metric = metric;
    }
    if let Some(direction) = args.direction {
        hparams.search.objective.direction = direction;
    }
    if let Some(experiment) = args.experiment {
        hparams.experiment.name = experiment;
    }
    if let Some(log_dir) = args.log_dir {
        hparams.experiment.log_dir = log_dir;
    }
    for (key, value) in &args.set {
        hparams.set_param(key, value);
    }
    if !args.command.is_empty() {
        hparams.trainer.command = args.command;
    }

    hparams.validate().context("Invalid hyperparameters")?;
    Ok(hparams)
}

fn run_command(args: RunArgs) -> Result<()> {
    let hparams = build_hparams(args)?;

    let trainer = CommandTrainer::new(&hparams.trainer)?;
    let record_dir = hparams.experiment.record_dir();
    let sweeper = LocalSweeper::new().with_record_dir(record_dir.clone());

    match dispatch(&hparams, &trainer, &sweeper)? {
        LaunchOutcome::Single(outcome) => {
            info!("Training completed in {:.1}s", outcome.duration_secs);
            for (name, value) in &outcome.metrics {
                info!("  {} = {}", name, value);
            }
        }
        LaunchOutcome::Sweep(report) => {
            save_sweep_summary(&record_dir, &report)?;
            if report.completed() == 0 {
                anyhow::bail!(
                    "All {} trial(s) of sweep '{}' failed",
                    report.results.len(),
                    report.experiment
                );
            }
        }
    }

    Ok(())
}

fn plan_command(args: RunArgs) -> Result<()> {
    let hparams = build_hparams(args)?;
    let search = &hparams.search;

    let trials = generate_trials(&search.space, search.strategy, search.nb_trials, search.seed)?;
    let workers = if hparams.gpus.is_empty() {
        format!("{} CPU worker(s)", search.nb_workers)
    } else {
        format!("GPUs {:?}", hparams.gpus.device_ids())
    };
    info!(
        "{} trial(s) planned for '{}' on {}",
        trials.len(),
        hparams.experiment.name,
        workers
    );

    let json = serde_json::to_string_pretty(&trials).context("Failed to serialize trials")?;
    println!("{}", json);
    Ok(())
}
