//! Quality gate: run a lane's external tools and decide PASS or FAIL.
//!
//! Tools are plain commands configured under `[tools.<name>]`. The gate reads
//! only their exit status and the first JSON object on stdout, compares the
//! reported metrics against the lane's [`QualityProfile`](crate::lane::QualityProfile)
//! and aggregates a [`QualityGateDecision`]. The gate never touches stage
//! artifacts; tool output is captured under the change's `gate/` directory.

mod engine;
pub mod metrics;
mod runner;

pub use engine::QualityGateRunner;
pub use runner::{ProcessToolRunner, ToolOutput, ToolRunner};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::lane::LaneName;

/// Per-tool status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub tool_name: String,
    pub status: ToolStatus,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Captured stdout/stderr of the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output_ref: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QualityGateResult {
    pub(crate) fn skipped(tool: &str, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool.to_string(),
            status: ToolStatus::Skipped,
            passed: false,
            exit_code: None,
            metrics: BTreeMap::new(),
            raw_output_ref: None,
            message: Some(message.into()),
        }
    }

    pub(crate) fn failed(tool: &str, message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Failed,
            ..Self::skipped(tool, message)
        }
    }
}

/// A threshold or reporting requirement that was not met.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateViolation {
    pub tool: String,
    pub metric: String,
    /// `None` when the metric was required but never reported
    pub actual: Option<f64>,
    pub required: Option<f64>,
}

impl std::fmt::Display for GateViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.actual, self.required) {
            (Some(actual), Some(required)) => write!(
                f,
                "{}: {} {:.1} < {:.1} required",
                self.tool, self.metric, actual, required
            ),
            (None, Some(required)) => write!(
                f,
                "{}: {} not reported ({:.1} required)",
                self.tool, self.metric, required
            ),
            _ => write!(f, "{}: {} not reported", self.tool, self.metric),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateOutcome {
    Pass,
    Fail,
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateOutcome::Pass => f.write_str("PASS"),
            GateOutcome::Fail => f.write_str("FAIL"),
        }
    }
}

/// Aggregate gate decision for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateDecision {
    pub overall: GateOutcome,
    pub lane: LaneName,
    /// The lane disables the gate; PASS was granted without running tools
    pub exempt: bool,
    /// A FAIL is reported but does not halt the pipeline
    pub advisory: bool,
    pub min_pass_rate: f64,
    pub min_coverage: f64,
    pub tools: BTreeMap<String, QualityGateResult>,
    pub violations: Vec<GateViolation>,
    pub evaluated_at: DateTime<Utc>,
}

impl QualityGateDecision {
    pub fn passed(&self) -> bool {
        self.overall == GateOutcome::Pass
    }

    /// Whether this decision halts the pipeline.
    pub fn blocks(&self) -> bool {
        !self.passed() && !self.advisory
    }

    /// Names of tools that failed.
    pub fn blocking_tools(&self) -> Vec<&str> {
        self.tools
            .values()
            .filter(|r| r.status == ToolStatus::Failed)
            .map(|r| r.tool_name.as_str())
            .collect()
    }

    /// One-line explanation naming failing tools and each metric's actual vs required value.
    pub fn summary(&self) -> String {
        if self.exempt {
            return format!("PASS (gate disabled for lane '{}')", self.lane);
        }
        if self.passed() {
            let ran = self
                .tools
                .values()
                .filter(|r| r.status == ToolStatus::Passed)
                .count();
            return format!("PASS ({} tool(s) passed)", ran);
        }
        let mut parts: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        for result in self.tools.values() {
            if result.status == ToolStatus::Failed
                && !self.violations.iter().any(|v| v.tool == result.tool_name)
            {
                let detail = result
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("exit code {}", result.exit_code.unwrap_or(-1)));
                parts.push(format!("{}: {}", result.tool_name, detail));
            }
        }
        if parts.is_empty() {
            parts.push("no quality tool ran".to_string());
        }
        format!("FAIL ({})", parts.join("; "))
    }

    /// Compact form written to `quality_metrics.json`.
    pub fn metrics_report(&self) -> serde_json::Value {
        let tools: serde_json::Map<String, serde_json::Value> = self
            .tools
            .iter()
            .map(|(name, r)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "status": r.status,
                        "passed": r.passed,
                        "metrics": r.metrics,
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "overall": self.overall,
            "lane": self.lane,
            "exempt": self.exempt,
            "advisory": self.advisory,
            "thresholds": {
                "min_pass_rate": self.min_pass_rate,
                "min_coverage": self.min_coverage,
            },
            "tools": tools,
            "violations": self.violations,
            "evaluated_at": self.evaluated_at,
        })
    }
}
