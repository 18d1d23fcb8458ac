//! Unified configuration for changeflow.
//!
//! Settings are read from `.changeflow/changeflow.toml`, then environment
//! variables, then CLI flags, and folded into one immutable [`PipelineConfig`]
//! that is built once at startup and passed by reference to the lane
//! resolver, the scheduler and the quality gate.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! changes_dir = "changes"
//!
//! [scheduler]
//! workers = 3
//! parallel = true
//! parallel_group = ["spec", "test_plan"]
//! quality_gate_stage = "test"
//! checkpoint_retention = 20
//!
//! [lanes.light]
//! advisory = true
//! tools = ["lint", "tests"]
//!
//! [lanes.strict]
//! min_coverage = 90.0
//!
//! [tools.tests]
//! command = ["cargo", "test-summary"]
//! reports = ["pass_rate", "coverage"]
//!
//! [tools.security]
//! command = ["cargo", "audit", "--json"]
//! optional = true
//!
//! [stages.implement]
//! command = ["make", "build"]
//!
//! [agent]
//! command = ["my-agent", "draft"]
//!
//! [[hooks]]
//! kind = "clean_tree"
//! stages = ["version_control"]
//!
//! [[hooks]]
//! kind = "env_credential"
//! stages = ["version_control"]
//! var = "GITHUB_TOKEN"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::lane::{Lane, LaneName, default_doc_patterns};
use crate::stage::StageId;

/// Bounds for the parallel group worker pool.
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 8;

/// Project-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Directory (relative to the project) holding one subdirectory per change
    #[serde(default = "default_changes_dir")]
    pub changes_dir: PathBuf,
}

fn default_changes_dir() -> PathBuf {
    PathBuf::from("changes")
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            changes_dir: default_changes_dir(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Worker count for the parallel group
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Run the parallel group concurrently (false forces serial execution)
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// First and last stage of the contiguous parallel-eligible group
    #[serde(default = "default_parallel_group")]
    pub parallel_group: Vec<String>,
    /// Stage after which the quality gate runs
    #[serde(default = "default_quality_gate_stage")]
    pub quality_gate_stage: String,
    /// Checkpoints kept by `checkpoints prune` when no count is given
    #[serde(default = "default_checkpoint_retention")]
    pub checkpoint_retention: usize,
}

fn default_workers() -> usize {
    3
}

fn default_parallel() -> bool {
    true
}

fn default_parallel_group() -> Vec<String> {
    vec!["spec".to_string(), "test_plan".to_string()]
}

fn default_quality_gate_stage() -> String {
    "test".to_string()
}

fn default_checkpoint_retention() -> usize {
    20
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            parallel: default_parallel(),
            parallel_group: default_parallel_group(),
            quality_gate_stage: default_quality_gate_stage(),
            checkpoint_retention: default_checkpoint_retention(),
        }
    }
}

/// Per-lane overrides; unset fields keep the built-in lane values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaneOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pass_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

/// An external quality-check tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Program and arguments; empty means "not configured"
    #[serde(default)]
    pub command: Vec<String>,
    /// A missing optional tool is skipped with a warning instead of failing the gate
    #[serde(default)]
    pub optional: bool,
    /// Metrics the tool must report in its JSON summary
    #[serde(default)]
    pub reports: Vec<String>,
}

/// A command bound to a stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageCommandConfig {
    #[serde(default)]
    pub command: Vec<String>,
}

/// External content-generation collaborator used with `--use-agent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub command: Vec<String>,
}

/// Kind of a configured pre-stage hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    /// Verify executables are callable
    ToolAvailable,
    /// Verify the git working tree has no unrelated uncommitted changes
    CleanTree,
    /// Verify an environment credential is present
    EnvCredential,
    /// Run a shell command; exit 0 passes
    Command,
}

/// A pre-stage hook definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDefinition {
    pub kind: HookKind,
    /// Stage names/ids this hook guards; `"*"` matches every stage
    #[serde(default = "default_hook_stages")]
    pub stages: Vec<String>,
    /// Optional display name (defaults to the kind)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Executables for `tool_available`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Variable for `env_credential`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,
    /// Shell command for `command`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

fn default_hook_stages() -> Vec<String> {
    vec!["*".to_string()]
}

/// Lane detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSection {
    #[serde(default = "default_doc_patterns")]
    pub doc_patterns: Vec<String>,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            doc_patterns: default_doc_patterns(),
        }
    }
}

/// The complete changeflow.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeflowToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub lanes: BTreeMap<String, LaneOverride>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,
    #[serde(default)]
    pub stages: BTreeMap<String, StageCommandConfig>,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub hooks: Vec<HookDefinition>,
    #[serde(default)]
    pub detection: DetectionSection,
}

impl ChangeflowToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse changeflow.toml")
    }

    /// Load `changeflow.toml` from the given `.changeflow` directory, or defaults if absent.
    pub fn load_or_default(changeflow_dir: &Path) -> Result<Self> {
        let path = changeflow_dir.join("changeflow.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize changeflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate and return human-readable warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for name in self.lanes.keys() {
            if name.parse::<LaneName>().is_err() {
                warnings.push(format!("Unknown lane '{}' in [lanes] is ignored", name));
            }
        }
        for name in self.stages.keys() {
            if name.parse::<StageId>().is_err() {
                warnings.push(format!("Unknown stage '{}' in [stages] is ignored", name));
            }
        }
        for (name, tool) in &self.tools {
            if tool.command.is_empty() {
                warnings.push(format!("Tool '{}' has no command configured", name));
            }
        }
        for hook in &self.hooks {
            match hook.kind {
                HookKind::ToolAvailable if hook.tools.is_empty() => warnings.push(
                    "Hook 'tool_available' lists no tools and will always pass".to_string(),
                ),
                HookKind::EnvCredential if hook.var.is_none() => {
                    warnings.push("Hook 'env_credential' has no var".to_string())
                }
                HookKind::Command if hook.command.is_none() => {
                    warnings.push("Hook 'command' has no command".to_string())
                }
                _ => {}
            }
        }
        if let Err(err) = PipelineConfig::from_toml(self.clone(), &ConfigOverrides::default()) {
            warnings.push(err.to_string());
        }
        warnings
    }
}

/// Overrides layered on top of the file, from environment and CLI.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub workers: Option<usize>,
    pub no_parallel: bool,
    pub agent_command: Option<Vec<String>>,
    pub changes_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Read `CHANGEFLOW_WORKERS`, `CHANGEFLOW_AGENT_CMD` and `CHANGEFLOW_CHANGES_DIR`.
    pub fn from_env() -> Self {
        Self {
            workers: std::env::var("CHANGEFLOW_WORKERS")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            no_parallel: false,
            agent_command: std::env::var("CHANGEFLOW_AGENT_CMD")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.split_whitespace().map(String::from).collect()),
            changes_dir: std::env::var("CHANGEFLOW_CHANGES_DIR").ok().map(PathBuf::from),
        }
    }

    /// Layer `other` on top of `self`; set fields in `other` win.
    pub fn merged_with(mut self, other: ConfigOverrides) -> Self {
        if other.workers.is_some() {
            self.workers = other.workers;
        }
        self.no_parallel |= other.no_parallel;
        if other.agent_command.is_some() {
            self.agent_command = other.agent_command;
        }
        if other.changes_dir.is_some() {
            self.changes_dir = other.changes_dir;
        }
        self
    }
}

/// Immutable pipeline configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    lanes: BTreeMap<LaneName, Lane>,
    /// Contiguous range of parallel-eligible stages
    pub parallel_group: RangeInclusive<StageId>,
    /// Worker pool size for the parallel group
    pub workers: usize,
    /// Whether the parallel group runs concurrently
    pub parallel: bool,
    pub quality_gate_stage: StageId,
    pub checkpoint_retention: usize,
    pub tools: BTreeMap<String, ToolConfig>,
    pub stage_commands: BTreeMap<StageId, Vec<String>>,
    pub agent_command: Vec<String>,
    pub hooks: Vec<HookDefinition>,
    pub doc_patterns: Vec<String>,
    pub changes_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // The built-in defaults always validate
        match Self::from_toml(ChangeflowToml::default(), &ConfigOverrides::default()) {
            Ok(config) => config,
            Err(err) => unreachable!("default configuration is invalid: {}", err),
        }
    }
}

impl PipelineConfig {
    /// Load from `<project>/.changeflow/changeflow.toml`, environment and CLI overrides.
    pub fn load(changeflow_dir: &Path, cli: ConfigOverrides) -> Result<Self, PipelineError> {
        let toml = ChangeflowToml::load_or_default(changeflow_dir)?;
        let overrides = ConfigOverrides::from_env().merged_with(cli);
        Self::from_toml(toml, &overrides)
    }

    /// Fold a parsed file and overrides into a validated configuration.
    pub fn from_toml(
        toml: ChangeflowToml,
        overrides: &ConfigOverrides,
    ) -> Result<Self, PipelineError> {
        let invalid = |msg: String| PipelineError::InvalidInvocation(msg);

        let mut lanes = BTreeMap::new();
        for name in LaneName::all() {
            let mut lane = Lane::default_for(*name);
            if let Some(ovr) = toml.lanes.get(name.as_str()) {
                if let Some(stages) = &ovr.stages {
                    lane.stages = crate::stage::parse_stage_list(stages)
                        .map_err(|e| invalid(format!("lane '{}': {}", name, e)))?;
                }
                if let Some(v) = ovr.gate_enabled {
                    lane.quality.gate_enabled = v;
                }
                if let Some(v) = ovr.advisory {
                    lane.quality.advisory = v;
                }
                if let Some(v) = ovr.min_pass_rate {
                    lane.quality.min_pass_rate = v;
                }
                if let Some(v) = ovr.min_coverage {
                    lane.quality.min_coverage = v;
                }
                if let Some(tools) = &ovr.tools {
                    lane.quality.tools = tools.clone();
                }
            }
            lane.validate().map_err(invalid)?;
            lanes.insert(*name, lane);
        }

        let group = &toml.scheduler.parallel_group;
        let parallel_group = match group.as_slice() {
            [first, last] => {
                let first: StageId = first.parse().map_err(|e| invalid(format!("{}", e)))?;
                let last: StageId = last.parse().map_err(|e| invalid(format!("{}", e)))?;
                if first > last {
                    return Err(invalid(format!(
                        "parallel_group start {} is after its end {}",
                        first, last
                    )));
                }
                first..=last
            }
            _ => {
                return Err(invalid(
                    "parallel_group must name exactly two stages: [first, last]".to_string(),
                ));
            }
        };

        let quality_gate_stage: StageId = toml
            .scheduler
            .quality_gate_stage
            .parse()
            .map_err(|e| invalid(format!("quality_gate_stage: {}", e)))?;
        if parallel_group.contains(&quality_gate_stage) {
            return Err(invalid(format!(
                "quality_gate_stage {} must not be inside the parallel group",
                quality_gate_stage
            )));
        }

        let workers = overrides.workers.unwrap_or(toml.scheduler.workers);
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(invalid(format!(
                "workers must be between {} and {} (got {})",
                MIN_WORKERS, MAX_WORKERS, workers
            )));
        }

        let mut stage_commands = BTreeMap::new();
        for (name, cfg) in &toml.stages {
            // Unknown stage names are reported by `validate` and skipped here
            if let Ok(stage) = name.parse::<StageId>()
                && !cfg.command.is_empty()
            {
                stage_commands.insert(stage, cfg.command.clone());
            }
        }

        Ok(Self {
            lanes,
            parallel_group,
            workers,
            parallel: toml.scheduler.parallel && !overrides.no_parallel,
            quality_gate_stage,
            checkpoint_retention: toml.scheduler.checkpoint_retention.max(1),
            tools: toml.tools,
            stage_commands,
            agent_command: overrides
                .agent_command
                .clone()
                .unwrap_or(toml.agent.command),
            hooks: toml.hooks,
            doc_patterns: toml.detection.doc_patterns,
            changes_dir: overrides
                .changes_dir
                .clone()
                .unwrap_or(toml.project.changes_dir),
        })
    }

    /// The lane with the given name. All names in the closed set are always present.
    pub fn lane(&self, name: LaneName) -> &Lane {
        &self.lanes[&name]
    }

    pub fn lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.values()
    }

    pub fn is_parallel_eligible(&self, stage: StageId) -> bool {
        self.parallel_group.contains(&stage)
    }

    /// Effective worker count (1 when parallel execution is disabled).
    pub fn effective_workers(&self) -> usize {
        if self.parallel { self.workers } else { 1 }
    }

    /// Return a copy with a different worker count / parallel flag (used by tests and `--workers`).
    pub fn with_workers(mut self, workers: usize, parallel: bool) -> Self {
        self.workers = workers.clamp(MIN_WORKERS, MAX_WORKERS);
        self.parallel = parallel;
        self
    }
}

/// Template written by `changeflow init` / `changeflow config init`.
pub const CONFIG_TEMPLATE: &str = r#"# changeflow configuration
#
# Layering: this file -> environment (CHANGEFLOW_WORKERS, CHANGEFLOW_AGENT_CMD,
# CHANGEFLOW_CHANGES_DIR) -> command-line flags.

[project]
changes_dir = "changes"

[scheduler]
workers = 3
parallel = true
parallel_group = ["spec", "test_plan"]
quality_gate_stage = "test"
checkpoint_retention = 20

# Quality tools print a JSON summary on stdout, e.g.
#   {"passed": 41, "failed": 1, "coverage": 78.5}
# A lane's gate fails when none of its tools could run.
#
# [tools.lint]
# command = ["cargo", "clippy", "--", "-D", "warnings"]
#
# [tools.type_check]
# command = ["cargo", "check"]
#
# [tools.tests]
# command = ["./scripts/test-summary.sh"]
# reports = ["pass_rate", "coverage"]
#
# [tools.security]
# command = ["cargo", "audit"]
# optional = true

# [lanes.light]
# advisory = true

# [stages.implement]
# command = ["make", "build"]

# [[hooks]]
# kind = "clean_tree"
# stages = ["version_control"]
"#;
