//! The stage runner used by the CLI.
//!
//! Resolution order for a stage:
//! 1. a command configured under `[stages.<name>]`
//! 2. the `[agent]` command, for document stages when `--use-agent` is set
//! 3. built-in behaviour (document templates, git commit, archive copy)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use super::runner::{StageContext, StageFailure, StageOutcome, StageRunner};
use super::StageId;
use crate::checkpoint::digest::collect_files;
use crate::commit;
use crate::flow_config::PipelineConfig;
use crate::tracker::GitTracker;
use crate::util::atomic_write;

pub struct ConfiguredStageRunner {
    stage_commands: BTreeMap<StageId, Vec<String>>,
    agent_command: Vec<String>,
    archive_dir: PathBuf,
}

impl ConfiguredStageRunner {
    pub fn new(config: &PipelineConfig, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            stage_commands: config.stage_commands.clone(),
            agent_command: config.agent_command.clone(),
            archive_dir: archive_dir.into(),
        }
    }

    fn run_command(
        &self,
        command: &[String],
        extra_args: &[String],
        stage: StageId,
        ctx: &StageContext,
    ) -> Result<StageOutcome, StageFailure> {
        let Some((program, args)) = command.split_first() else {
            return Err(StageFailure::new("empty command"));
        };
        debug!(stage = %stage, program = %program, "Running stage command");
        let output = Command::new(program)
            .args(args)
            .args(extra_args)
            .current_dir(&ctx.project_dir)
            .env("CHANGEFLOW_CHANGE_ID", &ctx.change_id)
            .env("CHANGEFLOW_CHANGE_DIR", &ctx.change_dir)
            .env("CHANGEFLOW_STAGE", stage.name())
            .env("CHANGEFLOW_LANE", &ctx.lane)
            .output()
            .map_err(|e| StageFailure::new(format!("failed to run '{}': {}", program, e)))?;

        let mut log: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        if output.status.success() {
            return Ok(StageOutcome {
                log,
                artifacts: Vec::new(),
            });
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        log.extend(stderr.lines().map(str::to_string));
        let last = stderr.lines().last().unwrap_or("").trim().to_string();
        let mut message = format!(
            "'{}' exited with code {}",
            program,
            output.status.code().unwrap_or(-1)
        );
        if !last.is_empty() {
            message.push_str(": ");
            message.push_str(&last);
        }
        Err(StageFailure::new(message).with_log(log))
    }

    fn run_agent(&self, stage: StageId, ctx: &StageContext) -> Result<StageOutcome, StageFailure> {
        let Some(artifact) = stage.info().artifact else {
            return Err(StageFailure::new("stage has no document to generate"));
        };
        if self.agent_command.is_empty() {
            return Err(StageFailure::new(
                "--use-agent requires an [agent] command (or CHANGEFLOW_AGENT_CMD)",
            ));
        }
        let target = ctx.change_dir.join(artifact);
        let args = vec![
            stage.name().to_string(),
            target.to_string_lossy().to_string(),
        ];
        let outcome = self.run_command(&self.agent_command, &args, stage, ctx)?;
        if !target.exists() {
            return Err(StageFailure::new(format!(
                "agent finished without producing {}",
                artifact
            ))
            .with_log(outcome.log));
        }
        Ok(StageOutcome {
            artifacts: vec![target],
            ..outcome
        }
        .with_line(format!("generated {}", artifact)))
    }

    fn draft_document(&self, stage: StageId, ctx: &StageContext) -> Result<StageOutcome, StageFailure> {
        let Some(artifact) = stage.info().artifact else {
            return Ok(StageOutcome::default());
        };
        let target = ctx.change_dir.join(artifact);
        if target.exists() {
            return Ok(StageOutcome::default()
                .with_line(format!("kept existing {}", artifact))
                .with_artifact(target));
        }
        atomic_write(&target, document_template(stage, &ctx.change_id).as_bytes())?;
        Ok(StageOutcome::default()
            .with_line(format!("drafted {}", artifact))
            .with_artifact(target))
    }

    fn commit_change(&self, ctx: &StageContext) -> Result<StageOutcome, StageFailure> {
        let message = match &ctx.commit_message {
            Some(message) => message.clone(),
            None => commit::propose_fix(&format!("chore: record change {}", ctx.change_id)),
        };
        if !ctx.no_verify {
            let result = commit::validate(&message);
            if !result.ok {
                return Err(StageFailure::new(format!(
                    "commit message rejected: {} (suggested: \"{}\"; pass --no-verify to bypass)",
                    result.describe(),
                    commit::propose_fix(&message)
                )));
            }
        }

        let tracker = GitTracker::try_open(&ctx.project_dir).ok_or_else(|| {
            StageFailure::new(format!(
                "{} is not a git repository",
                ctx.project_dir.display()
            ))
        })?;
        let header = message.lines().next().unwrap_or_default().to_string();
        match tracker.commit_dir(&ctx.change_dir, &message)? {
            Some(sha) => {
                info!(change_id = %ctx.change_id, sha = %sha, "Committed change");
                Ok(StageOutcome::default()
                    .with_line(format!("committed {}", header))
                    .with_line(format!("commit {}", &sha[..sha.len().min(12)])))
            }
            None => Ok(StageOutcome::default().with_line("nothing to commit")),
        }
    }

    fn archive_change(&self, ctx: &StageContext) -> Result<StageOutcome, StageFailure> {
        let target = self.archive_dir.join(&ctx.change_id);
        copy_tree(&ctx.change_dir, &target)?;
        let count = collect_files(&target)?.len();
        Ok(StageOutcome::default()
            .with_line(format!("archived {} file(s)", count))
            .with_artifact(target))
    }
}

impl StageRunner for ConfiguredStageRunner {
    fn run(&self, stage: StageId, ctx: &StageContext) -> Result<StageOutcome, StageFailure> {
        if stage == StageId::VERSION_CONTROL
            && let Some(command) = self.stage_commands.get(&stage)
        {
            // the message rules apply to configured commit commands too
            if !ctx.no_verify
                && let Some(message) = &ctx.commit_message
            {
                let result = commit::validate(message);
                if !result.ok {
                    return Err(StageFailure::new(format!(
                        "commit message rejected: {}",
                        result.describe()
                    )));
                }
            }
            return self.run_command(command, &[], stage, ctx);
        }
        if let Some(command) = self.stage_commands.get(&stage) {
            return self.run_command(command, &[], stage, ctx);
        }
        if ctx.use_agent && stage.info().agent_routable() {
            return self.run_agent(stage, ctx);
        }
        match stage {
            StageId::IMPLEMENT => {
                Ok(StageOutcome::default().with_line("no implement command configured"))
            }
            StageId::TEST => Ok(StageOutcome::default()
                .with_line("no test command configured; quality gate evaluates tools")),
            StageId::VERSION_CONTROL => self.commit_change(ctx),
            StageId::ARCHIVE => self.archive_change(ctx),
            _ => self.draft_document(stage, ctx),
        }
    }
}

/// Replace `target` with a copy of `source`.
fn copy_tree(source: &Path, target: &Path) -> anyhow::Result<()> {
    use anyhow::Context;
    if target.exists() {
        std::fs::remove_dir_all(target)
            .with_context(|| format!("Failed to clear {}", target.display()))?;
    }
    for relative in collect_files(source)? {
        let to = target.join(&relative);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::copy(source.join(&relative), &to)
            .with_context(|| format!("Failed to copy {}", relative.display()))?;
    }
    std::fs::create_dir_all(target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    Ok(())
}

fn document_template(stage: StageId, change_id: &str) -> String {
    let sections: &[&str] = match stage {
        StageId::PROPOSAL => &["Why", "What Changes", "Impact"],
        StageId::SPEC => &["Requirements", "Scenarios"],
        StageId::TASKS => &["Tasks"],
        StageId::TEST_PLAN => &["Scope", "Cases", "Exit Criteria"],
        StageId::DOC_SYNC => &["Updated Documents", "Follow-ups"],
        _ => &[],
    };
    let mut doc = format!("# {}: {}\n", stage.info().title, change_id);
    for section in sections {
        doc.push_str(&format!("\n## {}\n\n", section));
        if *section == "Tasks" {
            doc.push_str("- [ ] \n");
        } else {
            doc.push_str("TBD\n");
        }
    }
    doc
}
