use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StatusRecord, WorkflowRun};
use crate::gate::QualityGateDecision;
use crate::util::atomic_write_json;

const STATUS_FILE: &str = "status.json";
const METRICS_FILE: &str = "quality_metrics.json";

/// Reads and writes `status.json` / `quality_metrics.json` under `<state_root>/<change_id>/`.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    state_root: PathBuf,
}

impl StatusTracker {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn status_path(&self, change_id: &str) -> PathBuf {
        self.state_root.join(change_id).join(STATUS_FILE)
    }

    pub fn metrics_path(&self, change_id: &str) -> PathBuf {
        self.state_root.join(change_id).join(METRICS_FILE)
    }

    /// Persist the run atomically; also writes `quality_metrics.json` when a
    /// gate decision is given.
    pub fn write(
        &self,
        run: &WorkflowRun,
        decision: Option<&QualityGateDecision>,
    ) -> Result<StatusRecord> {
        let record = StatusRecord {
            change_id: run.change_id.clone(),
            run_id: run.run_id,
            lane: run.lane,
            status: run.state,
            current_stage: run.current_stage,
            completed_stages: run.completed_stages.iter().copied().collect(),
            failed_stages: run.failed_stages.iter().copied().collect(),
            quality_gate: decision.cloned(),
            resumable: run.resumable,
            tree_digest: run.tree_digest.clone().unwrap_or_default(),
            last_error: run.last_error.clone(),
            started_at: run.started_at,
            timestamp: Utc::now(),
        };
        if let Some(decision) = decision {
            atomic_write_json(&self.metrics_path(&run.change_id), &decision.metrics_report())?;
        }
        atomic_write_json(&self.status_path(&run.change_id), &record)?;
        debug!(
            change_id = %run.change_id,
            status = %run.state,
            completed = run.completed_stages.len(),
            "Wrote status record"
        );
        Ok(record)
    }

    /// Load the status record for `change_id`, if one exists.
    pub fn read(&self, change_id: &str) -> Result<Option<StatusRecord>> {
        let path = self.status_path(change_id);
        read_record(&path)
    }

    /// Remove the status and metrics files (checkpoints are kept).
    pub fn delete(&self, change_id: &str) -> Result<bool> {
        let mut removed = false;
        for path in [self.status_path(change_id), self.metrics_path(change_id)] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Change ids with a status record, sorted.
    pub fn list_changes(&self) -> Result<Vec<String>> {
        if !self.state_root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.state_root)
            .with_context(|| format!("Failed to read {}", self.state_root.display()))?
        {
            let entry = entry?;
            if entry.path().join(STATUS_FILE).exists() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn read_record(path: &Path) -> Result<Option<StatusRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let record = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(record))
}
