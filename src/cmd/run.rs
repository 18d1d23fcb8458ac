//! Pipeline execution command: `changeflow run`.

use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use changeflow::commit;
use changeflow::config::{Config, validate_change_id};
use changeflow::errors::PipelineError;
use changeflow::flow_config::ConfigOverrides;
use changeflow::gate::ProcessToolRunner;
use changeflow::hooks::registry_from_config;
use changeflow::lane::{LaneName, LaneResolver};
use changeflow::scheduler::{SchedulerConfig, StageScheduler};
use changeflow::stage::{ConfiguredStageRunner, StageContext};
use changeflow::status::{RunLock, StatusTracker};
use changeflow::tracker::GitTracker;
use changeflow::ui::{PipelineUI, UiMode};

use super::super::Cli;

pub struct RunArgs {
    pub change_id: String,
    pub lane: Option<String>,
    pub no_parallel: bool,
    pub workers: Option<usize>,
    pub resume: bool,
    pub use_agent: bool,
    pub message: Option<String>,
    pub no_verify: bool,
    pub ui: UiMode,
}

/// Paths with uncommitted changes, or nothing outside a git work tree.
pub(crate) fn changed_paths(project_dir: &Path) -> Vec<PathBuf> {
    match GitTracker::try_open(project_dir).map(|git| git.changed_paths()) {
        Some(Ok(paths)) => paths,
        Some(Err(e)) => {
            warn!("Could not read git status: {:#}", e);
            Vec::new()
        }
        None => Vec::new(),
    }
}

pub async fn cmd_run(project_dir: &Path, cli: &Cli, args: &RunArgs) -> Result<(), PipelineError> {
    validate_change_id(&args.change_id)?;
    if let Some(message) = &args.message
        && !args.no_verify
    {
        let result = commit::validate(message);
        if !result.ok {
            return Err(PipelineError::CommitFormat(format!(
                "{} (suggested: \"{}\"; pass --no-verify to bypass)",
                result.describe(),
                commit::propose_fix(message)
            )));
        }
    }

    let overrides = ConfigOverrides {
        workers: args.workers,
        no_parallel: args.no_parallel,
        ..Default::default()
    };
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, overrides)?;
    let pipeline = config.pipeline();
    let status = StatusTracker::new(&config.state_root);
    let existing = status.read(&args.change_id)?;

    let resolver = LaneResolver::new(pipeline);
    let lane = match (&args.lane, &existing) {
        (Some(name), _) => resolver.resolve(name)?,
        (None, Some(record)) if args.resume => pipeline.lane(record.lane),
        (None, _) => pipeline.lane(LaneName::default()),
    };
    let changed = changed_paths(&config.project_dir);
    if let Some(warning) = resolver.lighter_lane_warning(lane.name, changed.as_slice()) {
        warn!("{}", warning);
        eprintln!("{} {}", style("warning:").yellow().bold(), warning);
    }

    let _lock = RunLock::acquire(&config.state_dir(&args.change_id), &args.change_id)?;
    config.ensure_directories()?;

    let hooks = registry_from_config(
        &pipeline.hooks,
        &[config.changes_dir.clone(), config.changeflow_dir.clone()],
    )
    .map_err(|e| PipelineError::InvalidInvocation(format!("{:#}", e)))?;
    let runner = Arc::new(ConfiguredStageRunner::new(pipeline, config.archive_dir()));

    let (event_tx, event_rx) = mpsc::channel(100);
    let ui = Arc::new(PipelineUI::new(args.ui));
    let display_handle = ui.spawn(event_rx);

    let scheduler = StageScheduler::new(
        SchedulerConfig::from_pipeline(pipeline),
        runner,
        &config.state_root,
    )
    .with_hooks(hooks)
    .with_tools(pipeline.tools.clone(), Arc::new(ProcessToolRunner))
    .with_event_channel(event_tx);

    let ctx = StageContext {
        change_id: args.change_id.clone(),
        change_dir: config.change_dir(&args.change_id),
        project_dir: config.project_dir.clone(),
        lane: lane.name.to_string(),
        use_agent: args.use_agent,
        commit_message: args.message.clone(),
        no_verify: args.no_verify,
    };
    info!(change_id = %ctx.change_id, lane = %lane.name, resume = args.resume, "Running change");

    let mut stdout = std::io::stdout();
    let result = scheduler.execute(lane, ctx, args.resume, &mut stdout).await;
    // closes the event channel so the display task drains and exits
    drop(scheduler);
    let _ = display_handle.await;

    let report = result?;
    if report.already_complete {
        println!(
            "Change '{}' is already complete on lane {}; nothing to resume.",
            args.change_id, report.run.lane
        );
    } else {
        println!(
            "Change '{}' completed on lane {} ({} stage(s) run).",
            args.change_id,
            report.run.lane,
            report.executed.len()
        );
    }
    Ok(())
}
