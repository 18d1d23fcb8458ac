//! Core hook types: the [`Hook`] trait, its context and stage selectors.

use serde::Serialize;
use std::path::PathBuf;

use crate::stage::{StageContext, StageId};

/// Context handed to every hook (and serialized to JSON for command hooks).
#[derive(Debug, Clone, Serialize)]
pub struct HookContext {
    pub change_id: String,
    pub stage: StageId,
    pub stage_name: String,
    pub lane: String,
    pub change_dir: PathBuf,
    pub project_dir: PathBuf,
}

impl HookContext {
    pub fn for_stage(stage: StageId, ctx: &StageContext) -> Self {
        Self {
            change_id: ctx.change_id.clone(),
            stage,
            stage_name: stage.name().to_string(),
            lane: ctx.lane.clone(),
            change_dir: ctx.change_dir.clone(),
            project_dir: ctx.project_dir.clone(),
        }
    }
}

/// Which stages a registered hook applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSelector {
    Any,
    Stage(StageId),
}

impl StageSelector {
    pub fn matches(&self, stage: StageId) -> bool {
        match self {
            StageSelector::Any => true,
            StageSelector::Stage(id) => *id == stage,
        }
    }
}

impl std::str::FromStr for StageSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "*" | "any" => Ok(StageSelector::Any),
            other => Ok(StageSelector::Stage(other.parse()?)),
        }
    }
}

impl std::fmt::Display for StageSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageSelector::Any => f.write_str("*"),
            StageSelector::Stage(id) => f.write_str(id.name()),
        }
    }
}

/// A pre-stage precondition.
///
/// `check` returns `Err(reason)` to block the stage. Hooks may run on worker
/// threads for parallel-group stages.
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, ctx: &HookContext) -> Result<(), String>;
}
