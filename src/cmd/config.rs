//! Configuration view and validation commands: `changeflow config`.

use std::path::Path;

use changeflow::config::Config;
use changeflow::errors::PipelineError;
use changeflow::flow_config::{CONFIG_TEMPLATE, ChangeflowToml, ConfigOverrides};
use changeflow::init::CHANGEFLOW_DIR;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(
    project_dir: &Path,
    cli: &Cli,
    command: Option<ConfigCommands>,
) -> Result<(), PipelineError> {
    let changeflow_dir = project_dir.join(CHANGEFLOW_DIR);
    let config_path = changeflow_dir.join("changeflow.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Changeflow Configuration");
            println!("========================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                ChangeflowToml::load(&config_path)?
            } else {
                println!("No changeflow.toml found at {}", config_path.display());
                println!("Using default configuration.");
                ChangeflowToml::default()
            };
            println!();

            println!("[project]");
            println!("  changes_dir = \"{}\"", toml.project.changes_dir.display());
            println!();
            println!("[scheduler]");
            println!("  workers = {}", toml.scheduler.workers);
            println!("  parallel = {}", toml.scheduler.parallel);
            println!("  parallel_group = {:?}", toml.scheduler.parallel_group);
            println!(
                "  quality_gate_stage = \"{}\"",
                toml.scheduler.quality_gate_stage
            );
            println!(
                "  checkpoint_retention = {}",
                toml.scheduler.checkpoint_retention
            );
            println!();

            if !toml.tools.is_empty() {
                println!("[tools]");
                for (name, tool) in &toml.tools {
                    let optional = if tool.optional { " (optional)" } else { "" };
                    println!("  {} = {:?}{}", name, tool.command, optional);
                }
                println!();
            }
            if !toml.stages.is_empty() {
                println!("[stages]");
                for (name, stage) in &toml.stages {
                    println!("  {} = {:?}", name, stage.command);
                }
                println!();
            }
            if !toml.hooks.is_empty() {
                println!("hooks: {} configured", toml.hooks.len());
                println!();
            }

            // Environment and CLI overrides apply on top of the file
            println!("Effective values (with env overrides):");
            let config =
                Config::new(project_dir.to_path_buf(), cli.verbose, ConfigOverrides::default())?;
            let pipeline = config.pipeline();
            println!("  changes_dir = \"{}\"", config.changes_dir.display());
            println!("  workers = {}", pipeline.workers);
            println!("  parallel = {}", pipeline.parallel);
            println!(
                "  parallel_group = {} .. {}",
                pipeline.parallel_group.start(),
                pipeline.parallel_group.end()
            );
            println!("  quality_gate_stage = {}", pipeline.quality_gate_stage);
            if !pipeline.agent_command.is_empty() {
                println!("  agent_command = {:?}", pipeline.agent_command);
            }
            println!();

            if !config_path.exists() {
                println!("Run 'changeflow config init' to create a changeflow.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No changeflow.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = ChangeflowToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!(
                    "changeflow.toml already exists at {}",
                    config_path.display()
                );
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&changeflow_dir)
                .map_err(|e| PipelineError::io(&changeflow_dir, e))?;
            std::fs::write(&config_path, CONFIG_TEMPLATE)
                .map_err(|e| PipelineError::io(&config_path, e))?;

            println!("Created changeflow.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [scheduler] workers, parallel_group, quality_gate_stage");
            println!("  - [tools.<name>] commands reporting JSON for the quality gate");
            println!("  - [lanes.<name>] stages and thresholds");
            println!();
        }
    }

    Ok(())
}
