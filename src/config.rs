use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::flow_config::{ConfigOverrides, PipelineConfig};

/// Runtime configuration for changeflow.
///
/// Bridges the immutable [`PipelineConfig`] with the on-disk layout: where
/// change directories live and where per-change state (status, checkpoints,
/// gate output, lock) is kept.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub changeflow_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_root: PathBuf,
    pub changes_dir: PathBuf,
    pub verbose: bool,
    pipeline: PipelineConfig,
}

impl Config {
    /// Resolve the project directory and load the pipeline configuration.
    pub fn new(
        project_dir: PathBuf,
        verbose: bool,
        overrides: ConfigOverrides,
    ) -> Result<Self, PipelineError> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let changeflow_dir = project_dir.join(".changeflow");
        let pipeline = PipelineConfig::load(&changeflow_dir, overrides)?;
        Ok(Self::with_pipeline(project_dir, verbose, pipeline))
    }

    /// Build from an already-loaded pipeline configuration.
    pub fn with_pipeline(project_dir: PathBuf, verbose: bool, pipeline: PipelineConfig) -> Self {
        let changeflow_dir = project_dir.join(".changeflow");
        let changes_dir = if pipeline.changes_dir.is_absolute() {
            pipeline.changes_dir.clone()
        } else {
            project_dir.join(&pipeline.changes_dir)
        };
        Self {
            log_dir: changeflow_dir.join("logs"),
            state_root: changeflow_dir.join("state"),
            changeflow_dir,
            changes_dir,
            project_dir,
            verbose,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn config_file(&self) -> PathBuf {
        self.changeflow_dir.join("changeflow.toml")
    }

    /// Directory holding the artifacts of a change.
    pub fn change_dir(&self, change_id: &str) -> PathBuf {
        self.changes_dir.join(change_id)
    }

    /// Directory holding archived copies of completed changes.
    pub fn archive_dir(&self) -> PathBuf {
        self.changes_dir.join("archive")
    }

    /// Per-change state directory (status, checkpoints, lock, gate output).
    pub fn state_dir(&self, change_id: &str) -> PathBuf {
        self.state_root.join(change_id)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(&self.state_root).context("Failed to create state directory")?;
        std::fs::create_dir_all(&self.changes_dir)
            .context("Failed to create changes directory")?;
        Ok(())
    }
}

/// Reject change ids that could escape the changes or state directories.
pub fn validate_change_id(change_id: &str) -> Result<(), PipelineError> {
    let invalid = |why: &str| {
        PipelineError::InvalidInvocation(format!("invalid change id '{}': {}", change_id, why))
    };
    if change_id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if change_id == "archive" {
        return Err(invalid("'archive' is reserved"));
    }
    if change_id.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if !change_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("use letters, digits, '-', '_' or '.'"));
    }
    Ok(())
}

/// Walk up from `start` looking for a `.changeflow` directory.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".changeflow").is_dir())
        .map(Path::to_path_buf)
}
