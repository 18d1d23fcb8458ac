//! Checkpoint commands: `changeflow checkpoints list|restore|prune`.

use console::style;
use std::path::Path;

use changeflow::checkpoint::{CheckpointStore, tree_digest};
use changeflow::config::{Config, validate_change_id};
use changeflow::errors::PipelineError;
use changeflow::flow_config::ConfigOverrides;
use changeflow::status::{RunLock, StatusTracker, WorkflowRun};

use super::super::{CheckpointCommands, Cli};

pub fn cmd_checkpoints(
    project_dir: &Path,
    cli: &Cli,
    command: CheckpointCommands,
) -> Result<(), PipelineError> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, ConfigOverrides::default())?;
    match command {
        CheckpointCommands::List { change_id, all } => list(&config, &change_id, all),
        CheckpointCommands::Restore {
            change_id,
            checkpoint,
            force,
        } => restore(&config, &change_id, &checkpoint, force),
        CheckpointCommands::Prune { change_id, keep } => {
            let keep = keep.unwrap_or(config.pipeline().checkpoint_retention);
            prune(&config, &change_id, keep)
        }
    }
}

fn list(config: &Config, change_id: &str, all: bool) -> Result<(), PipelineError> {
    validate_change_id(change_id)?;
    let store = CheckpointStore::new(&config.state_dir(change_id));
    let checkpoints = if all { store.list_all()? } else { store.list()? };
    if checkpoints.is_empty() {
        println!("No checkpoints for '{}'.", change_id);
        return Ok(());
    }

    println!(
        "{:<28} {:<20} {:>5}  {:<12} Created",
        "Checkpoint", "Stage", "Files", "Digest"
    );
    for cp in &checkpoints {
        let line = format!(
            "{:<28} {:<20} {:>5}  {:<12} {}",
            cp.id,
            cp.stage_id.to_string(),
            cp.files.len(),
            cp.short_digest(),
            cp.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        if cp.superseded {
            println!("{} {}", style(line).dim(), style("(superseded)").dim());
        } else {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Restore a checkpoint and rewind the run so `--resume` continues after its stage.
fn restore(
    config: &Config,
    change_id: &str,
    checkpoint_id: &str,
    force: bool,
) -> Result<(), PipelineError> {
    validate_change_id(change_id)?;
    let state_dir = config.state_dir(change_id);
    let _lock = RunLock::acquire(&state_dir, change_id)?;
    let store = CheckpointStore::new(&state_dir);
    let change_dir = config.change_dir(change_id);

    let checkpoint = store.restore(checkpoint_id, &change_dir, force)?;
    println!(
        "Restored {} ({}, {} file(s)).",
        checkpoint.id,
        checkpoint.stage_id,
        checkpoint.files.len()
    );

    let tracker = StatusTracker::new(&config.state_root);
    if let Some(record) = tracker.read(change_id)? {
        let mut run = WorkflowRun::from_record(&record);
        run.rewind_to(checkpoint.stage_id);
        run.tree_digest = Some(tree_digest(&change_dir)?);
        let gate = record
            .quality_gate
            .filter(|_| checkpoint.stage_id >= config.pipeline().quality_gate_stage);
        tracker.write(&run, gate.as_ref())?;
        println!(
            "Run rewound; continue with: changeflow run {} --resume",
            change_id
        );
    }
    Ok(())
}

fn prune(config: &Config, change_id: &str, keep: usize) -> Result<(), PipelineError> {
    validate_change_id(change_id)?;
    let state_dir = config.state_dir(change_id);
    let _lock = RunLock::acquire(&state_dir, change_id)?;
    let report = CheckpointStore::new(&state_dir).prune(keep)?;
    for id in &report.removed {
        println!("  removed {}", id);
    }
    println!(
        "Pruned {} checkpoint(s); {} kept.",
        report.removed.len(),
        report.kept
    );
    Ok(())
}
