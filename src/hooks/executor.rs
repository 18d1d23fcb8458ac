//! Command hooks: run a shell command with the JSON context on stdin.
//!
//! Exit code 0 passes. Any other exit code blocks the stage, with the
//! command's stderr (or stdout when stderr is empty) as the reason.

use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

use super::types::{Hook, HookContext};

pub struct CommandHook {
    name: String,
    command: String,
}

impl CommandHook {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    fn execute(&self, ctx: &HookContext) -> Result<std::process::Output> {
        let context_json =
            serde_json::to_string(ctx).context("Failed to serialize hook context to JSON")?;

        debug!(hook = %self.name, command = %self.command, "Executing command hook");

        // Use shell to handle scripts properly
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&ctx.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("CHANGEFLOW_CHANGE_ID", &ctx.change_id)
            .env("CHANGEFLOW_STAGE", &ctx.stage_name)
            .env("CHANGEFLOW_LANE", &ctx.lane)
            .spawn()
            .with_context(|| format!("Failed to spawn hook command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A hook that never reads stdin closes the pipe early; that is not an error
            if let Err(e) = stdin.write_all(context_json.as_bytes())
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(e).context("Failed to write context to hook stdin");
            }
        }

        child
            .wait_with_output()
            .context("Failed to wait for hook command")
    }
}

impl Hook for CommandHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, ctx: &HookContext) -> Result<(), String> {
        let output = self.execute(ctx).map_err(|e| format!("{:#}", e))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let reason = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!(
                "command exited with code {}",
                output.status.code().unwrap_or(-1)
            )
        };
        Err(reason)
    }
}
