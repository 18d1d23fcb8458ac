use clap::error::ErrorKind;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use changeflow::config::find_project_root;
use changeflow::errors::{EXIT_INVALID_INVOCATION, EXIT_SUCCESS, PipelineError};
use changeflow::ui::UiMode;

mod cmd;

#[derive(Parser)]
#[command(name = "changeflow")]
#[command(version, about = "Staged change-management pipeline orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root (defaults to the nearest directory containing .changeflow, else the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Format of diagnostic logs on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive a change through the stages of a lane
    Run {
        /// Change identifier (directory name under the changes directory)
        change_id: String,

        /// Lane: light, standard or strict
        #[arg(short, long)]
        lane: Option<String>,

        /// Run the parallel group serially
        #[arg(long, conflicts_with = "workers")]
        no_parallel: bool,

        /// Worker pool size for the parallel group (1-8)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=8))]
        workers: Option<u8>,

        /// Continue a halted run from its first incomplete stage
        #[arg(long)]
        resume: bool,

        /// Generate stage documents with the configured agent command
        #[arg(long)]
        use_agent: bool,

        /// Commit message for the version_control stage
        #[arg(short, long)]
        message: Option<String>,

        /// Skip commit message validation
        #[arg(long)]
        no_verify: bool,

        /// Progress display on stderr
        #[arg(long, value_enum, default_value_t = UiMode::Full)]
        ui: UiMode,
    },
    /// Show the status of one change, or of every change
    Status {
        change_id: Option<String>,

        /// Print the raw status record as JSON
        #[arg(long)]
        json: bool,
    },
    /// List, restore or prune checkpoints
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Run the quality gate standalone
    Gate {
        change_id: String,

        /// Lane whose thresholds apply (defaults to the run's lane, else standard)
        #[arg(short, long)]
        lane: Option<String>,
    },
    /// Validate a commit message, optionally offering a corrected one
    CommitMsg {
        message: String,

        /// Offer a corrected message when validation fails
        #[arg(long)]
        fix: bool,

        /// Accept the message without validation
        #[arg(long)]
        no_verify: bool,

        /// Accept the proposed fix without prompting
        #[arg(short, long)]
        yes: bool,
    },
    /// List lanes with their stages and gate thresholds
    Lanes,
    /// Suggest a lane from the working tree's changed paths
    Detect,
    /// Drop a change's status record (checkpoints are kept)
    Reset {
        change_id: String,

        #[arg(long)]
        force: bool,
    },
    /// Initialize .changeflow in the project directory
    Init,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// List checkpoints on the current line
    List {
        change_id: String,

        /// Include superseded checkpoints
        #[arg(long)]
        all: bool,
    },
    /// Restore the change directory from a checkpoint
    Restore {
        change_id: String,
        checkpoint: String,

        /// Overwrite changes not captured by any checkpoint
        #[arg(long)]
        force: bool,
    },
    /// Remove superseded checkpoints and keep the newest N per stage
    Prune {
        change_id: String,

        /// Checkpoints to keep per stage (defaults to scheduler.checkpoint_retention)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default changeflow.toml file
    Init,
}

/// Console logging plus a daily file log when `.changeflow/logs` exists.
fn init_tracing(verbose: bool, format: LogFormat, log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("changeflow=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });

    let console = match format {
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    let (file, guard) = if log_dir.is_dir() {
        let appender = tracing_appender::rolling::daily(log_dir, "changeflow.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(filter)
        .init();
    guard
}

fn report_error(err: &PipelineError) {
    eprintln!("{} {}", style("error:").red().bold(), err);
    if let Some(stage) = err.stage() {
        eprintln!("  stage: {}", stage);
        if err.resume_viable() {
            eprintln!("  fix the cause, then re-run with --resume");
        }
    }
    if matches!(
        err,
        PipelineError::IntegrityMismatch { .. } | PipelineError::RestoreConflict { .. }
    ) {
        eprintln!("  --resume is not viable; restore a checkpoint or run `changeflow reset`");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                _ => EXIT_INVALID_INVOCATION,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };
    let _ = dotenvy::dotenv();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(cwd) => find_project_root(&cwd).unwrap_or(cwd),
            Err(e) => {
                eprintln!("{} failed to get current directory: {}", style("error:").red().bold(), e);
                return ExitCode::from(EXIT_INVALID_INVOCATION);
            }
        },
    };
    let _guard = init_tracing(
        cli.verbose,
        cli.log_format,
        &project_dir.join(".changeflow").join("logs"),
    );

    let result = match &cli.command {
        Commands::Run {
            change_id,
            lane,
            no_parallel,
            workers,
            resume,
            use_agent,
            message,
            no_verify,
            ui,
        } => {
            let args = cmd::RunArgs {
                change_id: change_id.clone(),
                lane: lane.clone(),
                no_parallel: *no_parallel,
                workers: workers.map(usize::from),
                resume: *resume,
                use_agent: *use_agent,
                message: message.clone(),
                no_verify: *no_verify,
                ui: *ui,
            };
            cmd::cmd_run(&project_dir, &cli, &args).await
        }
        Commands::Status { change_id, json } => {
            cmd::cmd_status(&project_dir, &cli, change_id.as_deref(), *json)
        }
        Commands::Checkpoints { command } => {
            cmd::cmd_checkpoints(&project_dir, &cli, command.clone())
        }
        Commands::Gate { change_id, lane } => {
            cmd::cmd_gate(&project_dir, &cli, change_id, lane.as_deref())
        }
        Commands::CommitMsg {
            message,
            fix,
            no_verify,
            yes,
        } => cmd::cmd_commit_msg(message, *fix, *no_verify, *yes),
        Commands::Lanes => cmd::cmd_lanes(&project_dir, &cli),
        Commands::Detect => cmd::cmd_detect(&project_dir, &cli),
        Commands::Reset { change_id, force } => {
            cmd::cmd_reset(&project_dir, &cli, change_id, *force)
        }
        Commands::Init => cmd::cmd_init(&project_dir),
        Commands::Config { command } => cmd::cmd_config(&project_dir, &cli, command.clone()),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(err) => {
            tracing::debug!(error = ?err, "Command failed");
            report_error(&err);
            ExitCode::from(err.exit_code())
        }
    }
}
