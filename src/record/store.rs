use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::search::{SweepReport, TrialResult};

pub const SUMMARY_FILE: &str = "summary.json";

/// Persist one trial result as `<dir>/trial_NNN.json`
pub fn save_trial_result(dir: &Path, result: &TrialResult) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create record directory: {:?}", dir))?;

    let path = dir.join(result.trial.name()).with_extension("json");
    let json = serde_json::to_string_pretty(result)
        .with_context(|| "Failed to serialize trial result")?;

    fs::write(&path, json)
        .with_context(|| format!("Failed to write trial result: {:?}", path))?;

    debug!("Trial {} recorded at {:?}", result.trial.index, path);
    Ok(path)
}

fn is_trial_record(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("json")
        && path
            .file_name()
            .and_then(|s| s.to_str())
            .is_some_and(|name| name.starts_with("trial_"))
}

/// Remove trial records and the summary left by an earlier sweep
pub fn clear_sweep_records(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let is_summary = path.file_name().and_then(|s| s.to_str()) == Some(SUMMARY_FILE);
        if entry.file_type().is_file() && (is_trial_record(path) || is_summary) {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale record: {:?}", path))?;
            removed += 1;
        }
    }

    if removed > 0 {
        info!("Removed {} stale record(s) from {:?}", removed, dir);
    }
    Ok(removed)
}

/// Load every trial record in a directory, sorted by trial index
pub fn list_trial_results(dir: &Path) -> Result<Vec<TrialResult>> {
    if !dir.exists() {
        warn!("Record directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }

    let mut results = Vec::new();

    for entry in WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !is_trial_record(path) {
            continue;
        }

        match fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|json| serde_json::from_str::<TrialResult>(&json).map_err(Into::into))
        {
            Ok(result) => results.push(result),
            Err(e) => warn!("Skipping unreadable trial record {:?}: {}", path, e),
        }
    }

    results.sort_by_key(|r| r.trial.index);

    Ok(results)
}

pub fn save_sweep_summary(dir: &Path, report: &SweepReport) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create record directory: {:?}", dir))?;

    let path = dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(report)
        .with_context(|| "Failed to serialize sweep summary")?;
    fs::write(&path, json)
        .with_context(|| format!("Failed to write sweep summary: {:?}", path))?;

    info!("Sweep summary saved: {:?}", path);
    Ok(path)
}

pub fn load_sweep_summary(dir: &Path) -> Result<SweepReport> {
    let path = dir.join(SUMMARY_FILE);
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read sweep summary: {:?}", path))?;
    serde_json::from_str(&json).with_context(|| "Failed to parse sweep summary")
}
