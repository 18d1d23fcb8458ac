//! Stage identifiers and the stage execution contract.
//!
//! This module provides:
//! - `StageId`, the stable position of a stage in the global total order
//! - `STAGES`, the static table describing every stage
//! - the `StageRunner` trait and the built-in runner used by the CLI

mod builtin;
mod runner;

pub use builtin::ConfiguredStageRunner;
pub use runner::{StageContext, StageFailure, StageOutcome, StageRunner};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Identifier of a stage in the global order.
///
/// Ids are stable across lanes: a lane selects a subset, it never renumbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(u8);

impl StageId {
    pub const PROPOSAL: StageId = StageId(0);
    pub const SPEC: StageId = StageId(1);
    pub const TASKS: StageId = StageId(2);
    pub const TEST_PLAN: StageId = StageId(3);
    pub const IMPLEMENT: StageId = StageId(4);
    pub const TEST: StageId = StageId(5);
    pub const DOC_SYNC: StageId = StageId(6);
    pub const VERSION_CONTROL: StageId = StageId(7);
    pub const ARCHIVE: StageId = StageId(8);

    /// Create a stage id, rejecting values outside the global order.
    pub fn new(value: u8) -> Option<Self> {
        if (value as usize) < STAGES.len() {
            Some(StageId(value))
        } else {
            None
        }
    }

    /// Numeric position in the global order.
    pub fn index(self) -> u8 {
        self.0
    }

    /// Static description of this stage.
    pub fn info(self) -> &'static StageInfo {
        &STAGES[self.0 as usize]
    }

    /// Short snake_case name (e.g. `test_plan`).
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// All stages in global order.
    pub fn all() -> impl Iterator<Item = StageId> {
        (0..STAGES.len() as u8).map(StageId)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02} {}", self.0, self.name())
    }
}

impl std::str::FromStr for StageId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(value) = trimmed.parse::<u8>() {
            return StageId::new(value)
                .ok_or_else(|| anyhow::anyhow!("Stage id {} is out of range 0..={}", value, STAGES.len() - 1));
        }
        let lower = trimmed.to_lowercase().replace('-', "_");
        STAGES
            .iter()
            .position(|info| info.name == lower)
            .map(|i| StageId(i as u8))
            .ok_or_else(|| {
                let names: Vec<&str> = STAGES.iter().map(|info| info.name).collect();
                anyhow::anyhow!("Invalid stage '{}'. Valid values: {}", s, names.join(", "))
            })
    }
}

/// Static description of a stage.
#[derive(Debug)]
pub struct StageInfo {
    /// snake_case identifier used in config and file names
    pub name: &'static str,
    /// Human-readable title
    pub title: &'static str,
    /// Document the stage drafts inside the change directory, if any
    pub artifact: Option<&'static str>,
}

impl StageInfo {
    /// Whether `--use-agent` routes this stage through the content-generation collaborator.
    pub fn agent_routable(&self) -> bool {
        self.artifact.is_some()
    }
}

/// The global stage order.
pub static STAGES: [StageInfo; 9] = [
    StageInfo {
        name: "proposal",
        title: "Draft change proposal",
        artifact: Some("proposal.md"),
    },
    StageInfo {
        name: "spec",
        title: "Write specification",
        artifact: Some("spec.md"),
    },
    StageInfo {
        name: "tasks",
        title: "Break down tasks",
        artifact: Some("tasks.md"),
    },
    StageInfo {
        name: "test_plan",
        title: "Plan tests",
        artifact: Some("test-plan.md"),
    },
    StageInfo {
        name: "implement",
        title: "Implement",
        artifact: None,
    },
    StageInfo {
        name: "test",
        title: "Run tests",
        artifact: None,
    },
    StageInfo {
        name: "doc_sync",
        title: "Sync documentation",
        artifact: Some("docs-sync.md"),
    },
    StageInfo {
        name: "version_control",
        title: "Commit change",
        artifact: None,
    },
    StageInfo {
        name: "archive",
        title: "Archive change",
        artifact: None,
    },
];

/// Parse a comma-separated or list-like set of stage references.
pub fn parse_stage_list(items: &[String]) -> Result<Vec<StageId>> {
    items.iter().map(|s| s.parse()).collect()
}
