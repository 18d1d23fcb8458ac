//! Lanes: named, ordered subsets of the global stage order.
//!
//! A lane carries the quality-gate threshold profile used at the gate stage.
//! Lanes are built once inside [`PipelineConfig`](crate::flow_config::PipelineConfig)
//! and handed out by reference; nothing mutates them after startup.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::PipelineError;
use crate::flow_config::PipelineConfig;
use crate::stage::StageId;

/// The closed set of lane names, ordered lightest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LaneName {
    Light,
    #[default]
    Standard,
    Strict,
}

impl LaneName {
    pub fn all() -> &'static [LaneName] {
        &[LaneName::Light, LaneName::Standard, LaneName::Strict]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LaneName::Light => "light",
            LaneName::Standard => "standard",
            LaneName::Strict => "strict",
        }
    }
}

impl std::fmt::Display for LaneName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LaneName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(LaneName::Light),
            "standard" => Ok(LaneName::Standard),
            "strict" => Ok(LaneName::Strict),
            _ => Err(PipelineError::UnknownLane {
                name: s.to_string(),
            }),
        }
    }
}

/// Quality-gate thresholds for a lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    /// When false the gate is skipped and reports PASS by exemption
    pub gate_enabled: bool,
    /// When true a FAIL decision is reported but does not halt the pipeline
    pub advisory: bool,
    /// Minimum test pass rate, in percent
    pub min_pass_rate: f64,
    /// Minimum coverage, in percent
    pub min_coverage: f64,
    /// Tool names (keys of `[tools]`) run by the gate, in order
    pub tools: Vec<String>,
}

/// An immutable lane definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    pub name: LaneName,
    pub stages: Vec<StageId>,
    pub quality: QualityProfile,
}

impl Lane {
    pub fn contains(&self, stage: StageId) -> bool {
        self.stages.binary_search(&stage).is_ok()
    }

    /// First lane stage not contained in `completed`.
    pub fn first_pending<'a>(
        &self,
        completed: impl IntoIterator<Item = &'a StageId> + Clone,
    ) -> Option<StageId> {
        self.stages
            .iter()
            .copied()
            .find(|stage| !completed.clone().into_iter().any(|done| done == stage))
    }

    /// Check the subsequence invariant: strictly increasing, no duplicates.
    pub fn validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err(format!("lane '{}' has no stages", self.name));
        }
        for pair in self.stages.windows(2) {
            if pair[0] >= pair[1] {
                return Err(format!(
                    "lane '{}' stages must be strictly increasing ({} is followed by {})",
                    self.name, pair[0], pair[1]
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn default_for(name: LaneName) -> Self {
        let all: Vec<StageId> = StageId::all().collect();
        match name {
            LaneName::Light => Lane {
                name,
                stages: vec![
                    StageId::PROPOSAL,
                    StageId::TASKS,
                    StageId::IMPLEMENT,
                    StageId::TEST,
                    StageId::VERSION_CONTROL,
                    StageId::ARCHIVE,
                ],
                quality: QualityProfile {
                    gate_enabled: true,
                    advisory: true,
                    min_pass_rate: 80.0,
                    min_coverage: 0.0,
                    tools: vec!["lint".into(), "tests".into()],
                },
            },
            LaneName::Standard => Lane {
                name,
                stages: all,
                quality: QualityProfile {
                    gate_enabled: true,
                    advisory: false,
                    min_pass_rate: 80.0,
                    min_coverage: 70.0,
                    tools: vec!["lint".into(), "type_check".into(), "tests".into()],
                },
            },
            LaneName::Strict => Lane {
                name,
                stages: all,
                quality: QualityProfile {
                    gate_enabled: true,
                    advisory: false,
                    min_pass_rate: 100.0,
                    min_coverage: 85.0,
                    tools: vec![
                        "lint".into(),
                        "type_check".into(),
                        "tests".into(),
                        "security".into(),
                    ],
                },
            },
        }
    }
}

/// Resolves lane names against the startup configuration.
pub struct LaneResolver<'a> {
    config: &'a PipelineConfig,
}

impl<'a> LaneResolver<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Resolve a lane by name; fails with `UnknownLane` outside the closed set.
    pub fn resolve(&self, name: &str) -> Result<&'a Lane, PipelineError> {
        let lane_name: LaneName = name.parse()?;
        Ok(self.config.lane(lane_name))
    }

    /// Suggest a lane from the paths touched by the change.
    ///
    /// Every path documentation-only → `light`; anything else (or nothing) → `standard`.
    pub fn detect_lane<P: AsRef<Path>>(&self, changed_paths: &[P]) -> LaneName {
        detect_lane_with(&self.config.doc_patterns, changed_paths)
    }

    /// Warning text when `requested` is lighter than what the changed paths suggest.
    pub fn lighter_lane_warning<P: AsRef<Path>>(
        &self,
        requested: LaneName,
        changed_paths: &[P],
    ) -> Option<String> {
        let detected = self.detect_lane(changed_paths);
        if requested < detected {
            let code_paths: Vec<String> = changed_paths
                .iter()
                .map(|p| p.as_ref().to_string_lossy().to_string())
                .filter(|p| !is_doc_path(&self.config.doc_patterns, p))
                .take(5)
                .collect();
            Some(format!(
                "Lane '{}' requested but the change touches non-documentation files ({}); '{}' is suggested",
                requested,
                code_paths.join(", "),
                detected
            ))
        } else {
            None
        }
    }
}

/// Default glob patterns for documentation-only paths.
pub fn default_doc_patterns() -> Vec<String> {
    [
        "*.md",
        "*.mdx",
        "*.rst",
        "*.txt",
        "*.adoc",
        "docs/**",
        "doc/**",
        "LICENSE*",
        "CHANGELOG*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn is_doc_path(patterns: &[String], path: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    let path = path.replace('\\', "/");
    let file_name = path.rsplit('/').next().unwrap_or(&path);
    patterns.iter().any(|raw| {
        let Ok(pattern) = Pattern::new(raw) else {
            return false;
        };
        // Patterns without a directory part match against the file name
        if raw.contains('/') {
            pattern.matches_with(&path, options)
        } else {
            pattern.matches_with(file_name, options)
        }
    })
}

fn detect_lane_with<P: AsRef<Path>>(patterns: &[String], changed_paths: &[P]) -> LaneName {
    if changed_paths.is_empty() {
        return LaneName::Standard;
    }
    let all_docs = changed_paths
        .iter()
        .all(|p| is_doc_path(patterns, &p.as_ref().to_string_lossy()));
    if all_docs {
        LaneName::Light
    } else {
        LaneName::Standard
    }
}
