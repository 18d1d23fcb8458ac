use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::Checkpoint;
use super::digest::{collect_files, digest_files, portable, tree_digest};
use super::lineage::Lineage;
use crate::errors::PipelineError;
use crate::stage::StageId;
use crate::util::atomic_write_json;

const MANIFEST: &str = "manifest.json";
const STAGING_PREFIX: &str = ".staging-";

/// Outcome of a prune.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub kept: usize,
}

/// Checkpoint storage for one change.
///
/// Only the controller saves, restores and prunes. Parallel group members are
/// snapshotted after the group joins, in ascending stage order, so the current
/// line is ordered by stage as well as by creation.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    lineage_path: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `<state_dir>/checkpoints`, with lineage at `<state_dir>/lineage.json`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            root: state_dir.join("checkpoints"),
            lineage_path: state_dir.join("lineage.json"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot `source_dir` as the checkpoint for `stage`.
    ///
    /// The snapshot is assembled in a staging directory and renamed into place,
    /// so a checkpoint is either complete or absent.
    pub fn save(&self, stage: StageId, source_dir: &Path) -> Result<Checkpoint, PipelineError> {
        std::fs::create_dir_all(&self.root).map_err(|e| PipelineError::io(&self.root, e))?;

        let staging = self
            .root
            .join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
        let files_dir = staging.join("files");
        std::fs::create_dir_all(&files_dir).map_err(|e| PipelineError::io(&files_dir, e))?;

        let result = self.assemble(stage, source_dir, &staging);
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        let checkpoint = result?;
        debug!(
            checkpoint = %checkpoint.id,
            files = checkpoint.files.len(),
            digest = checkpoint.short_digest(),
            "Saved checkpoint"
        );
        Ok(checkpoint)
    }

    fn assemble(
        &self,
        stage: StageId,
        source_dir: &Path,
        staging: &Path,
    ) -> Result<Checkpoint, PipelineError> {
        let files = collect_files(source_dir)?;
        let files_dir = staging.join("files");
        for relative in &files {
            let target = files_dir.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
            }
            std::fs::copy(source_dir.join(relative), &target)
                .map_err(|e| PipelineError::io(source_dir.join(relative), e))?;
        }
        // digest what was copied, not the live directory
        let content_digest = digest_files(&files_dir, &files)?;

        let (id, created_at, final_dir) = loop {
            let created_at = Utc::now();
            let id = format!(
                "{:02}-{}",
                stage.index(),
                created_at.format("%Y%m%dT%H%M%S%.6f")
            );
            let dir = self.root.join(&id);
            if !dir.exists() {
                break (id, created_at, dir);
            }
            std::thread::sleep(std::time::Duration::from_micros(1));
        };

        let mut checkpoint = Checkpoint {
            id,
            stage_id: stage,
            created_at,
            content_digest,
            files: files.iter().map(|p| portable(p)).collect(),
            path: final_dir.clone(),
            superseded: false,
        };
        atomic_write_json(&staging.join(MANIFEST), &checkpoint)?;
        std::fs::rename(staging, &final_dir).map_err(|e| PipelineError::io(&final_dir, e))?;
        checkpoint.path = final_dir;
        Ok(checkpoint)
    }

    /// Every checkpoint on disk, ordered by creation, with `superseded` populated.
    pub fn list_all(&self) -> Result<Vec<Checkpoint>, PipelineError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let lineage = Lineage::load(&self.lineage_path)?;
        let mut checkpoints = Vec::new();
        let entries = std::fs::read_dir(&self.root).map_err(|e| PipelineError::io(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(STAGING_PREFIX) || !entry.path().is_dir() {
                continue;
            }
            let manifest_path = entry.path().join(MANIFEST);
            let content = match std::fs::read_to_string(&manifest_path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(checkpoint = %name, error = %e, "Skipping checkpoint without manifest");
                    continue;
                }
            };
            let mut checkpoint: Checkpoint = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", manifest_path.display()))?;
            checkpoint.path = entry.path();
            checkpoint.superseded = lineage.is_superseded(&checkpoint.id);
            checkpoints.push(checkpoint);
        }
        checkpoints.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(checkpoints)
    }

    /// Checkpoints on the current line of succession, ordered by creation.
    pub fn list(&self) -> Result<Vec<Checkpoint>, PipelineError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|c| !c.superseded)
            .collect())
    }

    /// Find a checkpoint by id (current or superseded).
    pub fn find(&self, id: &str) -> Result<Checkpoint, PipelineError> {
        self.list_all()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| PipelineError::CheckpointNotFound { id: id.to_string() })
    }

    /// Newest current-line checkpoint.
    pub fn head(&self) -> Result<Option<Checkpoint>, PipelineError> {
        Ok(self.list()?.pop())
    }

    /// Newest current-line checkpoint for `stage`.
    pub fn latest_for_stage(&self, stage: StageId) -> Result<Option<Checkpoint>, PipelineError> {
        Ok(self.list()?.into_iter().rev().find(|c| c.stage_id == stage))
    }

    /// Materialize checkpoint `id` into `target_dir`.
    ///
    /// Fails with `RestoreConflict` when `target_dir` no longer matches the head
    /// checkpoint (it holds changes no checkpoint captured) unless `force` is set.
    /// Current-line checkpoints of later stages, and newer ones of the same
    /// stage, become superseded. Earlier stages stay on the current line, which
    /// matches how a run is rewound to the restored stage.
    pub fn restore(
        &self,
        id: &str,
        target_dir: &Path,
        force: bool,
    ) -> Result<Checkpoint, PipelineError> {
        let checkpoint = self.find(id)?;
        let current_line = self.list()?;

        if !force
            && let Some(head) = current_line.last()
        {
            let live = tree_digest(target_dir)?;
            if live != head.content_digest {
                return Err(PipelineError::RestoreConflict { id: id.to_string() });
            }
        }

        self.materialize(&checkpoint, target_dir)?;

        let superseded: Vec<String> = current_line
            .iter()
            .filter(|c| c.id != checkpoint.id)
            .filter(|c| {
                c.stage_id > checkpoint.stage_id
                    || (c.stage_id == checkpoint.stage_id && c.created_at > checkpoint.created_at)
            })
            .map(|c| c.id.clone())
            .collect();
        let mut lineage = Lineage::load(&self.lineage_path)?;
        lineage.record_restore(&checkpoint.id, superseded.clone());
        lineage.save(&self.lineage_path)?;

        info!(
            checkpoint = %checkpoint.id,
            superseded = superseded.len(),
            "Restored checkpoint"
        );
        Ok(Checkpoint {
            superseded: false,
            ..checkpoint
        })
    }

    fn materialize(&self, checkpoint: &Checkpoint, target_dir: &Path) -> Result<(), PipelineError> {
        let parent = target_dir
            .parent()
            .with_context(|| format!("{} has no parent directory", target_dir.display()))?;
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        let staging = parent.join(format!(".restore-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&staging).map_err(|e| PipelineError::io(&staging, e))?;

        let source = checkpoint.files_dir();
        for relative in &checkpoint.files {
            let from = source.join(relative);
            let to = staging.join(relative);
            if let Some(dir) = to.parent() {
                std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
            }
            if let Err(e) = std::fs::copy(&from, &to) {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(PipelineError::io(from, e));
            }
        }

        if target_dir.exists() {
            std::fs::remove_dir_all(target_dir).map_err(|e| PipelineError::io(target_dir, e))?;
        }
        std::fs::rename(&staging, target_dir).map_err(|e| PipelineError::io(target_dir, e))?;
        Ok(())
    }

    /// Physically remove superseded checkpoints and all but the newest
    /// `keep_last_n` current-line checkpoints of each stage.
    pub fn prune(&self, keep_last_n: usize) -> Result<PruneReport, PipelineError> {
        if keep_last_n == 0 {
            return Err(PipelineError::InvalidInvocation(
                "prune must keep at least one checkpoint per stage".to_string(),
            ));
        }
        let all = self.list_all()?;
        let mut per_stage: BTreeMap<StageId, usize> = BTreeMap::new();
        let mut report = PruneReport::default();

        for checkpoint in all.iter().rev() {
            let remove = if checkpoint.superseded {
                true
            } else {
                let seen = per_stage.entry(checkpoint.stage_id).or_default();
                *seen += 1;
                *seen > keep_last_n
            };
            if remove {
                std::fs::remove_dir_all(&checkpoint.path)
                    .map_err(|e| PipelineError::io(&checkpoint.path, e))?;
                report.removed.push(checkpoint.id.clone());
            } else {
                report.kept += 1;
            }
        }

        if !report.removed.is_empty() {
            let mut lineage = Lineage::load(&self.lineage_path)?;
            lineage.forget(&report.removed);
            lineage.save(&self.lineage_path)?;
        }
        report.removed.reverse();
        info!(removed = report.removed.len(), kept = report.kept, "Pruned checkpoints");
        Ok(report)
    }
}
