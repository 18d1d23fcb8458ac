//! Run status: the in-memory [`WorkflowRun`], its persisted [`StatusRecord`]
//! and the per-change [`RunLock`].
//!
//! `status.json` is the sole source of truth for resumption. It is written
//! only by the scheduler's controlling task, always atomically.

mod lock;
mod tracker;

pub use lock::RunLock;
pub use tracker::StatusTracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::gate::QualityGateDecision;
use crate::lane::LaneName;
use crate::stage::StageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    /// Stopped after a failure; `--resume` may continue
    Halted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Halted => "halted",
        };
        f.write_str(s)
    }
}

/// Mutable state of a pipeline run, owned by the scheduler's controlling task.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub change_id: String,
    pub lane: LaneName,
    pub current_stage: Option<StageId>,
    pub completed_stages: BTreeSet<StageId>,
    pub failed_stages: BTreeSet<StageId>,
    pub resumable: bool,
    pub state: RunState,
    /// Digest of the change directory as of the last status write
    pub tree_digest: Option<String>,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(change_id: impl Into<String>, lane: LaneName) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            change_id: change_id.into(),
            lane,
            current_stage: None,
            completed_stages: BTreeSet::new(),
            failed_stages: BTreeSet::new(),
            resumable: true,
            state: RunState::Running,
            tree_digest: None,
            last_error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a run from its persisted record (for `--resume`).
    pub fn from_record(record: &StatusRecord) -> Self {
        Self {
            run_id: record.run_id,
            change_id: record.change_id.clone(),
            lane: record.lane,
            current_stage: record.current_stage,
            completed_stages: record.completed_stages.iter().copied().collect(),
            failed_stages: record.failed_stages.iter().copied().collect(),
            resumable: record.resumable,
            state: record.status,
            tree_digest: Some(record.tree_digest.clone()),
            last_error: record.last_error.clone(),
            started_at: record.started_at,
            updated_at: record.timestamp,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn mark_running(&mut self, stage: StageId) {
        self.state = RunState::Running;
        self.current_stage = Some(stage);
        self.touch();
    }

    /// A stage succeeded; a retried stage leaves the failed set.
    pub fn mark_completed(&mut self, stage: StageId) {
        self.completed_stages.insert(stage);
        self.failed_stages.remove(&stage);
        self.touch();
    }

    pub fn mark_failed(&mut self, stage: StageId, error: impl Into<String>) {
        self.failed_stages.insert(stage);
        self.current_stage = Some(stage);
        self.last_error = Some(error.into());
        self.touch();
    }

    /// Stop the run after a failure.
    pub fn halt(&mut self, resumable: bool) {
        self.state = if resumable {
            RunState::Halted
        } else {
            RunState::Failed
        };
        self.resumable = resumable;
        self.touch();
    }

    pub fn complete(&mut self) {
        self.state = RunState::Completed;
        self.current_stage = None;
        self.last_error = None;
        self.resumable = false;
        self.touch();
    }

    /// Rewind to the state right after `stage` completed (used after a checkpoint restore).
    pub fn rewind_to(&mut self, stage: StageId) {
        self.completed_stages.retain(|s| *s <= stage);
        self.failed_stages.clear();
        self.current_stage = None;
        self.last_error = None;
        self.state = RunState::Halted;
        self.resumable = true;
        self.touch();
    }

    pub fn is_complete(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// The persisted `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub change_id: String,
    pub run_id: Uuid,
    pub lane: LaneName,
    pub status: RunState,
    pub current_stage: Option<StageId>,
    pub completed_stages: Vec<StageId>,
    pub failed_stages: Vec<StageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_gate: Option<QualityGateDecision>,
    pub resumable: bool,
    pub tree_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_moves_stage_from_failed_to_completed() {
        let mut run = WorkflowRun::new("add-login", LaneName::Standard);
        run.mark_running(StageId::TEST);
        run.mark_failed(StageId::TEST, "boom");
        run.halt(true);
        assert_eq!(run.state, RunState::Halted);
        assert!(run.failed_stages.contains(&StageId::TEST));

        run.mark_running(StageId::TEST);
        run.mark_completed(StageId::TEST);
        assert!(run.failed_stages.is_empty());
        assert!(run.completed_stages.contains(&StageId::TEST));
    }

    #[test]
    fn test_rewind_drops_later_stages() {
        let mut run = WorkflowRun::new("c", LaneName::Light);
        for stage in [StageId::PROPOSAL, StageId::TASKS, StageId::IMPLEMENT] {
            run.mark_completed(stage);
        }
        run.mark_failed(StageId::TEST, "gate");
        run.rewind_to(StageId::TASKS);
        assert_eq!(
            run.completed_stages.iter().copied().collect::<Vec<_>>(),
            vec![StageId::PROPOSAL, StageId::TASKS]
        );
        assert!(run.failed_stages.is_empty());
        assert!(run.resumable);
    }

    #[test]
    fn test_complete_is_not_resumable() {
        let mut run = WorkflowRun::new("c", LaneName::Light);
        run.complete();
        assert!(run.is_complete());
        assert!(!run.resumable);
    }
}
