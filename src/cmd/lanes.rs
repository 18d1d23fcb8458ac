//! Lane listing and detection commands: `changeflow lanes`, `changeflow detect`.

use console::style;
use std::path::Path;

use changeflow::config::Config;
use changeflow::errors::PipelineError;
use changeflow::flow_config::ConfigOverrides;
use changeflow::lane::{LaneName, LaneResolver};

use super::super::Cli;
use super::run::changed_paths;

pub fn cmd_lanes(project_dir: &Path, cli: &Cli) -> Result<(), PipelineError> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, ConfigOverrides::default())?;
    let pipeline = config.pipeline();

    for lane in pipeline.lanes() {
        let marker = if lane.name == LaneName::default() {
            " (default)"
        } else {
            ""
        };
        println!("{}{}", style(lane.name).bold(), marker);

        let stages: Vec<String> = lane.stages.iter().map(|s| s.to_string()).collect();
        println!("  stages:  {}", stages.join(", "));

        let quality = &lane.quality;
        if quality.gate_enabled {
            let mode = if quality.advisory { "advisory" } else { "blocking" };
            println!(
                "  gate:    {} after {}, pass rate >= {:.0}%, coverage >= {:.0}%",
                mode, pipeline.quality_gate_stage, quality.min_pass_rate, quality.min_coverage
            );
            println!("  tools:   {}", quality.tools.join(", "));
        } else {
            println!("  gate:    disabled");
        }
        println!();
    }
    Ok(())
}

pub fn cmd_detect(project_dir: &Path, cli: &Cli) -> Result<(), PipelineError> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, ConfigOverrides::default())?;
    let resolver = LaneResolver::new(config.pipeline());

    let changed = changed_paths(&config.project_dir);
    let lane = resolver.detect_lane(changed.as_slice());

    if changed.is_empty() {
        println!("No changed paths found.");
    } else {
        println!("Changed paths ({}):", changed.len());
        for path in changed.iter().take(20) {
            println!("  {}", path.display());
        }
        if changed.len() > 20 {
            println!("  ... and {} more", changed.len() - 20);
        }
    }
    println!();
    println!("Suggested lane: {}", style(lane).green().bold());
    Ok(())
}
