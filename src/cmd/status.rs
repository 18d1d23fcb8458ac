//! Status and reset commands.

use console::style;
use std::path::Path;

use changeflow::config::{Config, validate_change_id};
use changeflow::errors::PipelineError;
use changeflow::flow_config::ConfigOverrides;
use changeflow::status::{RunState, StatusRecord, StatusTracker};

use super::super::Cli;

pub fn cmd_status(
    project_dir: &Path,
    cli: &Cli,
    change_id: Option<&str>,
    json: bool,
) -> Result<(), PipelineError> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, ConfigOverrides::default())?;
    let tracker = StatusTracker::new(&config.state_root);

    let Some(change_id) = change_id else {
        return list_changes(&tracker, json);
    };
    validate_change_id(change_id)?;

    let Some(record) = tracker.read(change_id)? else {
        if json {
            println!("null");
        } else {
            println!("No run recorded for '{}'.", change_id);
        }
        return Ok(());
    };

    if json {
        let text = serde_json::to_string_pretty(&record)
            .map_err(|e| PipelineError::Other(e.into()))?;
        println!("{}", text);
        return Ok(());
    }
    print_record(&config, &record);
    Ok(())
}

fn list_changes(tracker: &StatusTracker, json: bool) -> Result<(), PipelineError> {
    let mut records = Vec::new();
    for change_id in tracker.list_changes()? {
        if let Some(record) = tracker.read(&change_id)? {
            records.push(record);
        }
    }

    if json {
        let text = serde_json::to_string_pretty(&records)
            .map_err(|e| PipelineError::Other(e.into()))?;
        println!("{}", text);
        return Ok(());
    }
    if records.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    println!("{:<24} {:<10} {:<10} Progress", "Change", "Lane", "Status");
    println!("{:<24} {:<10} {:<10} --------", "------", "----", "------");
    for record in &records {
        println!(
            "{:<24} {:<10} {:<10} {} done",
            record.change_id,
            record.lane.as_str(),
            record.status.to_string(),
            record.completed_stages.len()
        );
    }
    Ok(())
}

fn print_record(config: &Config, record: &StatusRecord) {
    let lane = config.pipeline().lane(record.lane);
    println!();
    println!("Change:  {}", style(&record.change_id).bold());
    println!("Lane:    {}", record.lane);
    println!("Status:  {}", state_label(record.status));
    println!("Run:     {}", record.run_id);
    println!("Updated: {}", record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    for stage in &lane.stages {
        let mark = if record.failed_stages.contains(stage) {
            style("✗").red()
        } else if record.completed_stages.contains(stage) {
            style("✓").green()
        } else {
            style("·").dim()
        };
        println!("  {} {}", mark, stage);
    }
    println!();

    if let Some(decision) = &record.quality_gate {
        println!("Quality gate: {}", decision.summary());
    }
    if let Some(error) = &record.last_error {
        println!("Last error:   {}", style(error).red());
    }
    match record.status {
        RunState::Halted if record.resumable => {
            println!();
            println!(
                "Resume with: changeflow run {} --resume",
                record.change_id
            );
        }
        RunState::Failed => {
            println!();
            println!(
                "Not resumable. Restore a checkpoint or run: changeflow reset {}",
                record.change_id
            );
        }
        _ => {}
    }
    println!();
}

fn state_label(state: RunState) -> console::StyledObject<String> {
    let label = state.to_string();
    match state {
        RunState::Completed => style(label).green(),
        RunState::Running => style(label).cyan(),
        RunState::Halted => style(label).yellow(),
        RunState::Failed => style(label).red(),
    }
}

pub fn cmd_reset(
    project_dir: &Path,
    cli: &Cli,
    change_id: &str,
    force: bool,
) -> Result<(), PipelineError> {
    use changeflow::status::RunLock;
    use dialoguer::Confirm;

    validate_change_id(change_id)?;
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, ConfigOverrides::default())?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "This drops the run status of '{}' (checkpoints are kept). Continue?",
                change_id
            ))
            .default(false)
            .interact()
            .map_err(|e| {
                eprintln!("Cannot prompt for confirmation; pass --force to reset without one.");
                super::prompt_failed(e)
            })?;
        if !confirm {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let _lock = RunLock::acquire(&config.state_dir(change_id), change_id)?;
    let tracker = StatusTracker::new(&config.state_root);
    if tracker.delete(change_id)? {
        println!("Reset '{}'. Checkpoints were kept.", change_id);
    } else {
        println!("No run recorded for '{}'.", change_id);
    }
    Ok(())
}
