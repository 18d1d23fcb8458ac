//! Typed error hierarchy for the changeflow pipeline.
//!
//! `PipelineError` is the one error the scheduler and CLI reason about. Each
//! variant maps to a process exit code via [`PipelineError::exit_code`]:
//! - `3` invalid invocation (unknown lane, conflicting flags, run already in progress)
//! - `2` quality-gate failure
//! - `1` everything else that halts a stage

use thiserror::Error;

use crate::stage::StageId;

/// Exit code for a successful run.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for a stage failure (hooks, stage logic, checkpoints, integrity).
pub const EXIT_STAGE_FAILURE: u8 = 1;
/// Exit code for a fatal quality-gate failure.
pub const EXIT_GATE_FAILURE: u8 = 2;
/// Exit code for an invalid invocation.
pub const EXIT_INVALID_INVOCATION: u8 = 3;

/// Errors surfaced by the pipeline engine.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown lane '{name}'. Valid lanes: light, standard, strict")]
    UnknownLane { name: String },

    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("Hook '{hook}' blocked stage {stage}: {reason}")]
    HookValidation {
        hook: String,
        stage: StageId,
        reason: String,
    },

    #[error("Stage {stage} failed: {message}")]
    StageExecution { stage: StageId, message: String },

    #[error("Quality gate failed at stage {stage}: {summary}")]
    QualityGateFailure { stage: StageId, summary: String },

    #[error("Checkpoint '{id}' not found")]
    CheckpointNotFound { id: String },

    #[error(
        "Cannot restore checkpoint '{id}': the change directory has changes newer than the latest checkpoint (use --force to discard them)"
    )]
    RestoreConflict { id: String },

    #[error(
        "Change directory for '{change_id}' was modified outside the pipeline (expected digest {expected}, found {actual}); refusing to resume"
    )]
    IntegrityMismatch {
        change_id: String,
        expected: String,
        actual: String,
    },

    #[error("A run is already in progress for change '{change_id}' (lock file: {lock_path})")]
    RunInProgress {
        change_id: String,
        lock_path: std::path::PathBuf,
    },

    #[error("Commit message rejected: {0}")]
    CommitFormat(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::UnknownLane { .. }
            | PipelineError::InvalidInvocation(_)
            | PipelineError::RunInProgress { .. } => EXIT_INVALID_INVOCATION,
            PipelineError::QualityGateFailure { .. } => EXIT_GATE_FAILURE,
            _ => EXIT_STAGE_FAILURE,
        }
    }

    /// Stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            PipelineError::HookValidation { stage, .. }
            | PipelineError::StageExecution { stage, .. }
            | PipelineError::QualityGateFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether a later `--resume` invocation can make progress after this error.
    ///
    /// Stage-level failures leave a valid status record and checkpoints behind;
    /// integrity and invocation errors need operator action first.
    pub fn resume_viable(&self) -> bool {
        matches!(
            self,
            PipelineError::HookValidation { .. }
                | PipelineError::StageExecution { .. }
                | PipelineError::QualityGateFailure { .. }
        )
    }

    pub fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}
