//! Stage scheduler: executes a lane's stages in order, runs the
//! parallel group on a bounded worker pool, evaluates the quality gate and
//! supports resuming a halted run.
//!
//! ```text
//! proposal ──► [ spec | tasks | test_plan ] ──► implement ──► test (gate) ──► ...
//!               bounded pool, fail-fast
//! ```
//!
//! Output from group members is buffered and released in stage order, so a
//! successful run prints the same bytes for any worker count.

mod controller;
mod events;
mod flusher;
mod plan;

pub use controller::{RunReport, StageScheduler};
pub use events::SchedulerEvent;
pub use flusher::OrderedFlusher;
pub use plan::{SchedulerConfig, Step, plan_steps};
