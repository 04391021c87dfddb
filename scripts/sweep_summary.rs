use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use emotion_launch::config::{Direction, Objective};
use emotion_launch::record::{list_trial_results, save_sweep_summary};
use emotion_launch::search::{SweepReport, TrialStatus};

#[derive(Debug, Parser)]
#[command(author, version, about = "Summarize the trial records of a hyperparameter sweep")]
struct Args {
    /// Experiment record directory (e.g. runs/emotion_transformer)
    #[arg(short, long)]
    dir: PathBuf,

    /// Metric used to rank trials
    #[arg(short, long, default_value = "val_loss")]
    metric: String,

    /// Rank by largest metric instead of smallest
    #[arg(long, default_value = "false")]
    maximize: bool,

    /// Number of ranked trials to print
    #[arg(long, default_value = "10")]
    top: usize,

    /// Write summary.json next to the records
    #[arg(long, default_value = "false")]
    write: bool,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let results = list_trial_results(&args.dir)?;
    info!("Found {} trial record(s) in {:?}", results.len(), args.dir);

    if results.is_empty() {
        anyhow::bail!("No trial records found in {:?}", args.dir);
    }

    let objective = Objective {
        metric: args.metric.clone(),
        direction: if args.maximize {
            Direction::Maximize
        } else {
            Direction::Minimize
        },
    };
    let experiment = args
        .dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("sweep")
        .to_string();
    let report = SweepReport::new(&experiment, objective, results);

    info!(
        "{} completed, {} failed",
        report.completed(),
        report.failed()
    );

    let mut ranked: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.status == TrialStatus::Completed)
        .filter_map(|r| r.metric(&args.metric).map(|v| (r, v)))
        .collect();
    ranked.sort_by(|(_, a), (_, b)| {
        let order = a.total_cmp(b);
        if args.maximize {
            order.reverse()
        } else {
            order
        }
    });

    if ranked.is_empty() {
        warn!("No completed trial reported '{}'", args.metric);
    }

    println!("{:<6} {:<10} {:>14} {:>10}  params", "rank", "trial", args.metric, "secs");
    for (rank, (result, value)) in ranked.iter().take(args.top).enumerate() {
        println!(
            "{:<6} {:<10} {:>14.6} {:>10.1}  {}",
            rank + 1,
            result.trial.name(),
            value,
            result.duration_secs,
            serde_json::to_string(&result.trial.params)?
        );
    }

    for result in report.results.iter().filter(|r| r.status != TrialStatus::Completed) {
        warn!(
            "{} {:?} (exit code: {:?}){}",
            result.trial.name(),
            result.status,
            result.exit_code,
            result
                .error
                .as_deref()
                .map(|e| format!(": {}", e))
                .unwrap_or_default()
        );
    }

    if args.write {
        save_sweep_summary(&args.dir, &report)?;
    }

    Ok(())
}
