use serde::Serialize;

use crate::lane::LaneName;
use crate::stage::StageId;

/// Events emitted by the scheduler's controlling task.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    RunStarted {
        change_id: String,
        lane: LaneName,
        /// Lane stages still to run
        pending: Vec<StageId>,
        /// Lane stages already completed by an earlier invocation
        skipped: Vec<StageId>,
        resumed: bool,
    },
    StageStarted {
        stage: StageId,
    },
    StageCompleted {
        stage: StageId,
        checkpoint: String,
    },
    StageFailed {
        stage: StageId,
        error: String,
    },
    GroupStarted {
        stages: Vec<StageId>,
        workers: usize,
    },
    GroupCompleted {
        completed: Vec<StageId>,
        failed: Vec<StageId>,
        /// Members never dispatched because another member failed
        not_started: Vec<StageId>,
    },
    GateEvaluated {
        stage: StageId,
        passed: bool,
        advisory: bool,
        summary: String,
    },
    RunCompleted {
        success: bool,
    },
}
