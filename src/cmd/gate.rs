//! Standalone quality gate: `changeflow gate`.

use console::style;
use std::path::Path;

use changeflow::config::{Config, validate_change_id};
use changeflow::errors::PipelineError;
use changeflow::flow_config::ConfigOverrides;
use changeflow::gate::{ProcessToolRunner, QualityGateRunner, ToolStatus};
use changeflow::lane::{LaneName, LaneResolver};
use changeflow::status::StatusTracker;

use super::super::Cli;

/// Evaluate the gate without touching the run status.
pub fn cmd_gate(
    project_dir: &Path,
    cli: &Cli,
    change_id: &str,
    lane: Option<&str>,
) -> Result<(), PipelineError> {
    validate_change_id(change_id)?;
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, ConfigOverrides::default())?;
    let pipeline = config.pipeline();
    let lane = match lane {
        Some(name) => LaneResolver::new(pipeline).resolve(name)?,
        None => {
            let recorded = StatusTracker::new(&config.state_root)
                .read(change_id)?
                .map(|r| r.lane);
            pipeline.lane(recorded.unwrap_or(LaneName::default()))
        }
    };

    let tool_runner = ProcessToolRunner;
    let decision = QualityGateRunner::new(&pipeline.tools, &tool_runner, &config.project_dir)
        .with_output_dir(config.state_dir(change_id).join("gate"))
        .run(lane)?;

    println!();
    println!("Quality gate for '{}' (lane {})", change_id, lane.name);
    for result in decision.tools.values() {
        let mark = match result.status {
            ToolStatus::Passed => style("pass").green(),
            ToolStatus::Failed => style("FAIL").red(),
            ToolStatus::Skipped => style("skip").yellow(),
        };
        let metrics: Vec<String> = result
            .metrics
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!(
            "  {:<12} {}  {}{}",
            result.tool_name,
            mark,
            metrics.join(" "),
            result
                .message
                .as_ref()
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        );
    }
    println!();
    println!("{}", decision.summary());

    if decision.blocks() {
        return Err(PipelineError::QualityGateFailure {
            stage: pipeline.quality_gate_stage,
            summary: decision.summary(),
        });
    }
    Ok(())
}
