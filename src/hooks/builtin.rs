//! Built-in hook kinds that need no external script.

use std::path::{Path, PathBuf};

use super::types::{Hook, HookContext};
use crate::tracker::GitTracker;

/// Locate an executable by name, searching `PATH` when `name` has no directory part.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Passes when every listed tool is callable.
pub struct ToolAvailableHook {
    name: String,
    tools: Vec<String>,
}

impl ToolAvailableHook {
    pub fn new(tools: Vec<String>) -> Self {
        Self {
            name: "tool_available".to_string(),
            tools,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Hook for ToolAvailableHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, _ctx: &HookContext) -> Result<(), String> {
        let missing: Vec<&str> = self
            .tools
            .iter()
            .filter(|tool| find_executable(tool).is_none())
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("required tools not found on PATH: {}", missing.join(", ")))
        }
    }
}

/// Passes when the git working tree has no uncommitted changes outside the
/// excluded directories (the changes directory and `.changeflow/`).
pub struct CleanTreeHook {
    name: String,
    excluded_dirs: Vec<PathBuf>,
}

impl CleanTreeHook {
    pub fn new(excluded_dirs: Vec<PathBuf>) -> Self {
        Self {
            name: "clean_tree".to_string(),
            excluded_dirs,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Hook for CleanTreeHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, ctx: &HookContext) -> Result<(), String> {
        let tracker = GitTracker::try_open(&ctx.project_dir)
            .ok_or_else(|| format!("{} is not a git repository", ctx.project_dir.display()))?;

        let mut excluded = Vec::new();
        for dir in &self.excluded_dirs {
            if let Ok(Some(relative)) = tracker.relative_to_workdir(dir) {
                excluded.push(relative);
            }
        }
        let dirty = tracker
            .dirty_paths_excluding(&excluded)
            .map_err(|e| format!("failed to read git status: {:#}", e))?;
        if dirty.is_empty() {
            return Ok(());
        }
        let listed: Vec<String> = dirty
            .iter()
            .take(5)
            .map(|p| p.display().to_string())
            .collect();
        let more = if dirty.len() > 5 {
            format!(" and {} more", dirty.len() - 5)
        } else {
            String::new()
        };
        Err(format!(
            "{} uncommitted file(s) outside the change: {}{}",
            dirty.len(),
            listed.join(", "),
            more
        ))
    }
}

/// Passes when an environment variable is set and non-empty.
pub struct EnvCredentialHook {
    name: String,
    var: String,
}

impl EnvCredentialHook {
    pub fn new(var: impl Into<String>) -> Self {
        Self {
            name: "env_credential".to_string(),
            var: var.into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Hook for EnvCredentialHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, _ctx: &HookContext) -> Result<(), String> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(()),
            Ok(_) => Err(format!("{} is set but empty", self.var)),
            Err(_) => Err(format!("{} is not set", self.var)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageId;
    use std::fs;
    use tempfile::tempdir;

    fn ctx(project_dir: &Path) -> HookContext {
        HookContext {
            change_id: "add-login".into(),
            stage: StageId::VERSION_CONTROL,
            stage_name: "version_control".into(),
            lane: "standard".into(),
            change_dir: project_dir.join("changes/add-login"),
            project_dir: project_dir.to_path_buf(),
        }
    }

    #[test]
    fn test_tool_available_finds_sh() {
        let dir = tempdir().unwrap();
        let hook = ToolAvailableHook::new(vec!["sh".into()]);
        assert!(hook.check(&ctx(dir.path())).is_ok());
    }

    #[test]
    fn test_tool_available_reports_missing() {
        let dir = tempdir().unwrap();
        let hook = ToolAvailableHook::new(vec!["sh".into(), "definitely-not-a-tool-xyz".into()]);
        let reason = hook.check(&ctx(dir.path())).unwrap_err();
        assert!(reason.contains("definitely-not-a-tool-xyz"));
        assert!(!reason.contains("sh,"));
    }

    #[test]
    fn test_env_credential_missing() {
        let dir = tempdir().unwrap();
        let hook = EnvCredentialHook::new("CHANGEFLOW_TEST_SURELY_UNSET_VAR");
        let reason = hook.check(&ctx(dir.path())).unwrap_err();
        assert!(reason.contains("not set"));
    }

    #[test]
    fn test_env_credential_present() {
        let dir = tempdir().unwrap();
        // PATH is always present in the test environment
        assert!(EnvCredentialHook::new("PATH").check(&ctx(dir.path())).is_ok());
    }

    #[test]
    fn test_clean_tree_ignores_excluded_dirs() {
        let dir = tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("changes/add-login")).unwrap();
        fs::write(dir.path().join("changes/add-login/proposal.md"), "p").unwrap();
        fs::create_dir_all(dir.path().join(".changeflow/state")).unwrap();
        fs::write(dir.path().join(".changeflow/state/status.json"), "{}").unwrap();

        let hook = CleanTreeHook::new(vec![
            dir.path().join("changes"),
            dir.path().join(".changeflow"),
        ]);
        assert!(hook.check(&ctx(dir.path())).is_ok());

        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let reason = hook.check(&ctx(dir.path())).unwrap_err();
        assert!(reason.contains("main.rs"));
    }

    #[test]
    fn test_clean_tree_outside_repo() {
        let dir = tempdir().unwrap();
        let hook = CleanTreeHook::new(vec![]);
        assert!(hook.check(&ctx(dir.path())).unwrap_err().contains("not a git repository"));
    }
}
