use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use super::metrics::{COVERAGE, PASS_RATE, parse_metrics};
use super::runner::{ToolOutput, ToolRunner};
use super::{GateOutcome, GateViolation, QualityGateDecision, QualityGateResult, ToolStatus};
use crate::flow_config::ToolConfig;
use crate::lane::Lane;

/// Evaluates a lane's quality profile.
pub struct QualityGateRunner<'a> {
    tools: &'a BTreeMap<String, ToolConfig>,
    runner: &'a dyn ToolRunner,
    workdir: PathBuf,
    output_dir: Option<PathBuf>,
}

impl<'a> QualityGateRunner<'a> {
    pub fn new(
        tools: &'a BTreeMap<String, ToolConfig>,
        runner: &'a dyn ToolRunner,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tools,
            runner,
            workdir: workdir.into(),
            output_dir: None,
        }
    }

    /// Capture each tool's output to `<dir>/<tool>.log`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Run every tool in the lane's profile and aggregate the decision.
    pub fn run(&self, lane: &Lane) -> Result<QualityGateDecision> {
        let profile = &lane.quality;
        let mut decision = QualityGateDecision {
            overall: GateOutcome::Pass,
            lane: lane.name,
            exempt: false,
            advisory: profile.advisory,
            min_pass_rate: profile.min_pass_rate,
            min_coverage: profile.min_coverage,
            tools: BTreeMap::new(),
            violations: Vec::new(),
            evaluated_at: Utc::now(),
        };

        if !profile.gate_enabled {
            decision.exempt = true;
            info!(lane = %lane.name, "Quality gate disabled for lane; passing by exemption");
            return Ok(decision);
        }

        for tool in &profile.tools {
            let result = self.run_one(tool, lane, &mut decision.violations)?;
            decision.tools.insert(tool.clone(), result);
        }

        // Thresholds above zero need at least one tool to have reported the metric
        for (metric, required) in [
            (PASS_RATE, profile.min_pass_rate),
            (COVERAGE, profile.min_coverage),
        ] {
            let reported = decision
                .tools
                .values()
                .any(|r| r.metrics.contains_key(metric));
            if required > 0.0 && !reported {
                decision.violations.push(GateViolation {
                    tool: "gate".to_string(),
                    metric: metric.to_string(),
                    actual: None,
                    required: Some(required),
                });
            }
        }

        let any_ran = decision
            .tools
            .values()
            .any(|r| r.status != ToolStatus::Skipped);
        let any_failed = decision
            .tools
            .values()
            .any(|r| r.status == ToolStatus::Failed);
        decision.overall = if any_ran && !any_failed && decision.violations.is_empty() {
            GateOutcome::Pass
        } else {
            GateOutcome::Fail
        };

        info!(
            lane = %lane.name,
            overall = %decision.overall,
            advisory = decision.advisory,
            violations = decision.violations.len(),
            "Quality gate evaluated"
        );
        Ok(decision)
    }

    fn run_one(
        &self,
        tool: &str,
        lane: &Lane,
        violations: &mut Vec<GateViolation>,
    ) -> Result<QualityGateResult> {
        let config = match self.tools.get(tool) {
            Some(config) if !config.command.is_empty() => config,
            _ => {
                warn!(tool, "Quality tool is not configured; skipping");
                return Ok(QualityGateResult::skipped(tool, "not configured"));
            }
        };

        let output = match self.runner.run_tool(tool, &config.command, &self.workdir) {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let message = format!("executable '{}' not found", config.command[0]);
                if config.optional {
                    warn!(tool, "{}; optional tool skipped", message);
                    return Ok(QualityGateResult::skipped(tool, message));
                }
                warn!(tool, "{}", message);
                return Ok(QualityGateResult::failed(tool, message));
            }
            Err(e) => {
                return Ok(QualityGateResult::failed(tool, format!("failed to run: {}", e)));
            }
        };

        let raw_output_ref = self.capture(tool, &config.command, &output)?;
        let metrics = parse_metrics(&output.stdout);
        let violations_before = violations.len();

        let thresholds = [
            (PASS_RATE, lane.quality.min_pass_rate),
            (COVERAGE, lane.quality.min_coverage),
        ];
        for (metric, required) in thresholds {
            if let Some(&actual) = metrics.get(metric)
                && actual < required
            {
                violations.push(GateViolation {
                    tool: tool.to_string(),
                    metric: metric.to_string(),
                    actual: Some(actual),
                    required: Some(required),
                });
            }
        }
        for metric in &config.reports {
            if !metrics.contains_key(metric) {
                let required = thresholds
                    .iter()
                    .find(|(name, _)| name == metric)
                    .map(|(_, value)| *value);
                violations.push(GateViolation {
                    tool: tool.to_string(),
                    metric: metric.clone(),
                    actual: None,
                    required,
                });
            }
        }

        let passed = output.success() && violations.len() == violations_before;
        let message = if !output.success() {
            let stderr = output.stderr.trim();
            Some(if stderr.is_empty() {
                format!("exit code {}", output.exit_code)
            } else {
                format!(
                    "exit code {}: {}",
                    output.exit_code,
                    crate::util::truncate(stderr.lines().last().unwrap_or(stderr), 120)
                )
            })
        } else {
            None
        };

        Ok(QualityGateResult {
            tool_name: tool.to_string(),
            status: if passed {
                ToolStatus::Passed
            } else {
                ToolStatus::Failed
            },
            passed,
            exit_code: Some(output.exit_code),
            metrics,
            raw_output_ref,
            message,
        })
    }

    fn capture(&self, tool: &str, command: &[String], output: &ToolOutput) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.output_dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("{}.log", tool));
        let content = format!(
            "$ {}\nexit code: {}\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
            command.join(" "),
            output.exit_code,
            output.stdout,
            output.stderr
        );
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::{LaneName, QualityProfile};
    use crate::stage::StageId;
    use std::collections::HashMap;
    use std::io;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Scripted runner: tool name -> output, or NotFound when absent.
    struct MockRunner {
        outputs: HashMap<String, ToolOutput>,
        invocations: Mutex<Vec<String>>,
    }

    impl MockRunner {
        fn new(entries: &[(&str, i32, &str)]) -> Self {
            Self {
                outputs: entries
                    .iter()
                    .map(|(name, code, stdout)| {
                        (
                            name.to_string(),
                            ToolOutput {
                                exit_code: *code,
                                stdout: stdout.to_string(),
                                stderr: String::new(),
                            },
                        )
                    })
                    .collect(),
                invocations: Mutex::new(Vec::new()),
            }
        }
    }

    impl ToolRunner for MockRunner {
        fn run_tool(&self, tool: &str, _command: &[String], _workdir: &Path) -> io::Result<ToolOutput> {
            self.invocations.lock().unwrap().push(tool.to_string());
            self.outputs
                .get(tool)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing"))
        }
    }

    fn tool_configs(names: &[&str]) -> BTreeMap<String, ToolConfig> {
        names
            .iter()
            .map(|n| {
                (
                    n.to_string(),
                    ToolConfig {
                        command: vec![format!("run-{}", n)],
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    fn lane(min_pass_rate: f64, min_coverage: f64, tools: &[&str]) -> Lane {
        Lane {
            name: LaneName::Standard,
            stages: vec![StageId::TEST],
            quality: QualityProfile {
                gate_enabled: true,
                advisory: false,
                min_pass_rate,
                min_coverage,
                tools: tools.iter().map(|t| t.to_string()).collect(),
            },
        }
    }

    #[test]
    fn test_passes_when_metrics_meet_thresholds() {
        let tools = tool_configs(&["lint", "tests"]);
        let runner = MockRunner::new(&[
            ("lint", 0, ""),
            ("tests", 0, r#"{"pass_rate": 82, "coverage": 71}"#),
        ]);
        let dir = tempdir().unwrap();
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane(80.0, 70.0, &["lint", "tests"]))
            .unwrap();
        assert_eq!(decision.overall, GateOutcome::Pass);
        assert!(decision.violations.is_empty());
        assert!(decision.blocking_tools().is_empty());
    }

    #[test]
    fn test_fails_naming_coverage_below_threshold() {
        let tools = tool_configs(&["tests"]);
        let runner = MockRunner::new(&[("tests", 0, r#"{"pass_rate": 82, "coverage": 69}"#)]);
        let dir = tempdir().unwrap();
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane(80.0, 70.0, &["tests"]))
            .unwrap();

        assert_eq!(decision.overall, GateOutcome::Fail);
        assert!(decision.blocks());
        assert_eq!(decision.violations.len(), 1);
        let violation = &decision.violations[0];
        assert_eq!(violation.metric, "coverage");
        assert_eq!(violation.actual, Some(69.0));
        assert_eq!(violation.required, Some(70.0));
        assert!(decision.summary().contains("coverage 69.0 < 70.0"));
        assert_eq!(decision.blocking_tools(), vec!["tests"]);
    }

    #[test]
    fn test_nonzero_exit_fails_tool() {
        let tools = tool_configs(&["lint", "tests"]);
        let runner = MockRunner::new(&[
            ("lint", 1, ""),
            ("tests", 0, r#"{"pass_rate": 100, "coverage": 90}"#),
        ]);
        let dir = tempdir().unwrap();
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane(80.0, 70.0, &["lint", "tests"]))
            .unwrap();
        assert_eq!(decision.overall, GateOutcome::Fail);
        assert_eq!(decision.blocking_tools(), vec!["lint"]);
        assert!(decision.summary().contains("lint: exit code 1"));
    }

    #[test]
    fn test_missing_optional_tool_is_skipped() {
        let mut tools = tool_configs(&["tests", "security"]);
        tools.get_mut("security").unwrap().optional = true;
        let runner = MockRunner::new(&[("tests", 0, r#"{"pass_rate": 100, "coverage": 90}"#)]);
        let dir = tempdir().unwrap();
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane(100.0, 85.0, &["tests", "security"]))
            .unwrap();
        assert_eq!(decision.overall, GateOutcome::Pass);
        assert_eq!(decision.tools["security"].status, ToolStatus::Skipped);
    }

    #[test]
    fn test_missing_required_tool_fails() {
        let tools = tool_configs(&["tests", "security"]);
        let runner = MockRunner::new(&[("tests", 0, r#"{"pass_rate": 100, "coverage": 90}"#)]);
        let dir = tempdir().unwrap();
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane(100.0, 85.0, &["tests", "security"]))
            .unwrap();
        assert_eq!(decision.overall, GateOutcome::Fail);
        assert_eq!(decision.tools["security"].status, ToolStatus::Failed);
        assert!(decision.summary().contains("not found"));
    }

    #[test]
    fn test_no_tool_ran_is_not_a_pass() {
        let tools = BTreeMap::new();
        let runner = MockRunner::new(&[]);
        let dir = tempdir().unwrap();
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane(0.0, 0.0, &["lint"]))
            .unwrap();
        assert_eq!(decision.overall, GateOutcome::Fail);
        assert_eq!(decision.tools["lint"].status, ToolStatus::Skipped);
        assert!(runner.invocations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_required_threshold_without_report_fails() {
        let tools = tool_configs(&["tests"]);
        let runner = MockRunner::new(&[("tests", 0, r#"{"pass_rate": 95}"#)]);
        let dir = tempdir().unwrap();
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane(80.0, 70.0, &["tests"]))
            .unwrap();
        assert_eq!(decision.overall, GateOutcome::Fail);
        assert!(decision.summary().contains("coverage not reported"));
    }

    #[test]
    fn test_declared_report_missing_fails_tool() {
        let mut tools = tool_configs(&["tests"]);
        tools.get_mut("tests").unwrap().reports = vec!["pass_rate".into()];
        let runner = MockRunner::new(&[("tests", 0, "ok")]);
        let dir = tempdir().unwrap();
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane(0.0, 0.0, &["tests"]))
            .unwrap();
        assert_eq!(decision.tools["tests"].status, ToolStatus::Failed);
        assert_eq!(decision.violations[0].metric, "pass_rate");
    }

    #[test]
    fn test_disabled_gate_passes_by_exemption() {
        let tools = BTreeMap::new();
        let runner = MockRunner::new(&[]);
        let dir = tempdir().unwrap();
        let mut lane = lane(100.0, 100.0, &["tests"]);
        lane.quality.gate_enabled = false;
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane)
            .unwrap();
        assert!(decision.passed());
        assert!(decision.exempt);
        assert!(decision.summary().contains("gate disabled"));
    }

    #[test]
    fn test_advisory_fail_does_not_block() {
        let tools = tool_configs(&["tests"]);
        let runner = MockRunner::new(&[("tests", 0, r#"{"pass_rate": 50}"#)]);
        let dir = tempdir().unwrap();
        let mut lane = lane(80.0, 0.0, &["tests"]);
        lane.quality.advisory = true;
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane)
            .unwrap();
        assert!(!decision.passed());
        assert!(!decision.blocks());
    }

    #[test]
    fn test_output_is_captured_per_tool() {
        let tools = tool_configs(&["tests"]);
        let runner = MockRunner::new(&[("tests", 0, r#"{"pass_rate": 100, "coverage": 100}"#)]);
        let dir = tempdir().unwrap();
        let gate_dir = dir.path().join("gate");
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .with_output_dir(&gate_dir)
            .run(&lane(80.0, 70.0, &["tests"]))
            .unwrap();
        let log = decision.tools["tests"].raw_output_ref.clone().unwrap();
        assert_eq!(log, gate_dir.join("tests.log"));
        assert!(std::fs::read_to_string(log).unwrap().contains("pass_rate"));
    }

    #[test]
    fn test_metrics_report_shape() {
        let tools = tool_configs(&["tests"]);
        let runner = MockRunner::new(&[("tests", 0, r#"{"pass_rate": 82, "coverage": 71}"#)]);
        let dir = tempdir().unwrap();
        let decision = QualityGateRunner::new(&tools, &runner, dir.path())
            .run(&lane(80.0, 70.0, &["tests"]))
            .unwrap();
        let report = decision.metrics_report();
        assert_eq!(report["overall"], "PASS");
        assert_eq!(report["tools"]["tests"]["metrics"]["coverage"], 71.0);
        assert_eq!(report["thresholds"]["min_coverage"], 70.0);
    }
}
