//! The stage execution contract.

use std::path::PathBuf;

use super::StageId;

/// Everything a stage needs to know about the change it works on.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub change_id: String,
    /// Directory holding the change's artifacts (the checkpointed tree)
    pub change_dir: PathBuf,
    pub project_dir: PathBuf,
    /// Name of the lane the run uses
    pub lane: String,
    /// Route document stages through the external content-generation command
    pub use_agent: bool,
    /// Commit message for the version-control stage (a default is derived when absent)
    pub commit_message: Option<String>,
    /// Skip commit-message validation
    pub no_verify: bool,
}

/// Successful stage result. `log` lines are presented in stage order by the scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutcome {
    pub log: Vec<String>,
    pub artifacts: Vec<PathBuf>,
}

impl StageOutcome {
    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.log.push(line.into());
        self
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}

/// Failed stage result, keeping whatever output the stage produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub message: String,
    pub log: Vec<String>,
}

impl StageFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            log: Vec::new(),
        }
    }

    pub fn with_log(mut self, log: Vec<String>) -> Self {
        self.log = log;
        self
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<anyhow::Error> for StageFailure {
    fn from(err: anyhow::Error) -> Self {
        StageFailure::new(format!("{:#}", err))
    }
}

/// Executes the work of a single stage.
///
/// Implementations are called from blocking worker threads, possibly several
/// at once for members of the parallel group, so they must be `Send + Sync`
/// and only write inside their own stage's artifacts.
pub trait StageRunner: Send + Sync {
    fn run(&self, stage: StageId, ctx: &StageContext) -> Result<StageOutcome, StageFailure>;
}

impl<F> StageRunner for F
where
    F: Fn(StageId, &StageContext) -> Result<StageOutcome, StageFailure> + Send + Sync,
{
    fn run(&self, stage: StageId, ctx: &StageContext) -> Result<StageOutcome, StageFailure> {
        self(stage, ctx)
    }
}
