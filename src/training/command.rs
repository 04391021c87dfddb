use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{HParams, TrainerConfig};
use crate::error::{LaunchError, LaunchResult};
use crate::gpu::visible_devices;
use crate::training::{TrainOutcome, Trainer, TrialContext};

pub const TRIAL_INDEX_ENV: &str = "SWEEP_TRIAL_INDEX";

/// Runs the training entry point as a child process.
///
/// Hyperparameters become `--key value` flags, GPUs are exposed through
/// `CUDA_VISIBLE_DEVICES`, and metrics are scraped from stdout lines such
/// as `val_loss=0.42`.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    program: String,
    base_args: Vec<String>,
    env: BTreeMap<String, String>,
    pass_gpus: bool,
    metric_re: Regex,
}

impl CommandTrainer {
    pub fn new(config: &TrainerConfig) -> LaunchResult<Self> {
        let (program, base_args) = config
            .command
            .split_first()
            .ok_or_else(|| LaunchError::Config("no training command configured".to_string()))?;

        let metric_re = Regex::new(&config.metric_pattern).map_err(|e| {
            LaunchError::Config(format!("invalid metric pattern: {}", e))
        })?;
        if metric_re.captures_len() < 3 {
            return Err(LaunchError::Config(
                "metric pattern needs a name group and a value group".to_string(),
            ));
        }

        Ok(Self {
            program: program.clone(),
            base_args: base_args.to_vec(),
            env: config.env.clone(),
            pass_gpus: config.pass_gpus,
            metric_re,
        })
    }

    /// Arguments passed after the configured command
    pub fn build_args(&self, hparams: &HParams, ctx: &TrialContext) -> Vec<String> {
        let mut args = self.base_args.clone();

        for (key, value) in &hparams.params {
            let flag = format!("--{}", key);
            match value {
                Value::Null | Value::Bool(false) => {}
                Value::Bool(true) => args.push(flag),
                Value::Array(items) => {
                    args.push(flag);
                    args.extend(items.iter().map(value_to_arg));
                }
                other => {
                    args.push(flag);
                    args.push(value_to_arg(other));
                }
            }
        }

        if self.pass_gpus {
            args.push("--gpus".to_string());
            args.push(ctx.gpu_ids.len().to_string());
        }

        args
    }

    /// Metric reported by one stdout line, if any
    pub fn parse_metric(&self, line: &str) -> Option<(String, f64)> {
        let caps = self.metric_re.captures(line)?;
        let name = caps.get(1)?.as_str().to_string();
        let value = caps.get(2)?.as_str().parse::<f64>().ok()?;
        Some((name, value))
    }

    /// Scan child output for metrics until EOF.
    ///
    /// Lines are decoded lossily. The pipe is always drained to EOF so the
    /// child never writes into a closed pipe.
    fn collect_metrics<R: BufRead>(&self, mut reader: R, label: &str) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(&['\n', '\r'][..]);
                    debug!("[{}] {}", label, line);
                    if let Some((name, value)) = self.parse_metric(line) {
                        metrics.insert(name, value);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("{}: stopped parsing output: {}", label, e);
                    if let Err(e) = io::copy(&mut reader, &mut io::sink()) {
                        warn!("{}: failed to drain output: {}", label, e);
                    }
                    break;
                }
            }
        }
        metrics
    }

    fn command(&self, hparams: &HParams, ctx: &TrialContext) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.build_args(hparams, ctx))
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if !ctx.gpu_ids.is_empty() {
            cmd.env("CUDA_VISIBLE_DEVICES", visible_devices(&ctx.gpu_ids));
        }
        if let Some(index) = ctx.trial_index {
            cmd.env(TRIAL_INDEX_ENV, index.to_string());
        }
        cmd
    }
}

impl Trainer for CommandTrainer {
    fn train(&self, hparams: &HParams, ctx: &TrialContext) -> LaunchResult<TrainOutcome> {
        let label = ctx
            .trial_index
            .map_or_else(|| "run".to_string(), |i| format!("trial {}", i));
        info!("Starting {}: {} (gpus: {:?})", label, self.program, ctx.gpu_ids);

        let started = Instant::now();
        let mut child = self
            .command(hparams, ctx)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let metrics = match child.stdout.take() {
            Some(stdout) => self.collect_metrics(BufReader::new(stdout), &label),
            None => BTreeMap::new(),
        };

        let status = child.wait()?;
        let outcome = TrainOutcome {
            exit_code: status.code(),
            metrics,
            duration_secs: started.elapsed().as_secs_f64(),
        };

        if outcome.success() {
            info!(
                "{} finished in {:.1}s with {} metric(s)",
                label,
                outcome.duration_secs,
                outcome.metrics.len()
            );
        } else {
            warn!("{} exited unsuccessfully: {:?}", label, outcome.exit_code);
        }

        Ok(outcome)
    }
}

fn value_to_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
