//! Execution seam for external quality tools.

use std::io;
use std::path::Path;
use std::process::Command;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a quality tool. An `io::ErrorKind::NotFound` error means the
/// executable is missing.
pub trait ToolRunner: Send + Sync {
    fn run_tool(&self, tool: &str, command: &[String], workdir: &Path) -> io::Result<ToolOutput>;
}

/// Default process-backed runner.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessToolRunner;

impl ToolRunner for ProcessToolRunner {
    fn run_tool(&self, tool: &str, command: &[String], workdir: &Path) -> io::Result<ToolOutput> {
        let Some((program, args)) = command.split_first() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("tool '{}' has an empty command", tool),
            ));
        };
        let output = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .env("CHANGEFLOW_TOOL", tool)
            .output()?;
        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
