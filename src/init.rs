//! `changeflow init`: create the `.changeflow/` directory structure.
//!
//! ```text
//! .changeflow/
//! ├── changeflow.toml  # Pipeline configuration (template)
//! ├── state/           # Per-change status, checkpoints, gate output
//! └── logs/            # Daily rolling log files
//! changes/             # Change directories (configurable)
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::flow_config::{CONFIG_TEMPLATE, ChangeflowToml};

/// The name of the changeflow configuration directory.
pub const CHANGEFLOW_DIR: &str = ".changeflow";

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    pub changeflow_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
    /// Whether `changeflow.toml` was written by this call
    pub wrote_config: bool,
}

/// Initialize `project_dir`; an existing layout is completed, never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let changeflow_dir = project_dir.join(CHANGEFLOW_DIR);
    let created = !changeflow_dir.exists();

    for dir in [changeflow_dir.join("state"), changeflow_dir.join("logs")] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_path = changeflow_dir.join("changeflow.toml");
    let wrote_config = !config_path.exists();
    if wrote_config {
        std::fs::write(&config_path, CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }

    let toml = ChangeflowToml::load(&config_path)?;
    let changes_dir = project_dir.join(&toml.project.changes_dir);
    std::fs::create_dir_all(&changes_dir).with_context(|| {
        format!(
            "Failed to create changes directory: {}",
            changes_dir.display()
        )
    })?;

    Ok(InitResult {
        changeflow_dir,
        created,
        wrote_config,
    })
}

/// Check if a project is already initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(CHANGEFLOW_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_layout() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert!(result.wrote_config);
        assert_eq!(result.changeflow_dir, dir.path().join(".changeflow"));
        assert!(dir.path().join(".changeflow/state").is_dir());
        assert!(dir.path().join(".changeflow/logs").is_dir());
        assert!(dir.path().join(".changeflow/changeflow.toml").is_file());
        assert!(dir.path().join("changes").is_dir());
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".changeflow")).unwrap();
        std::fs::write(
            dir.path().join(".changeflow/changeflow.toml"),
            "[project]\nchanges_dir = \"work\"\n",
        )
        .unwrap();

        let result = init_project(dir.path()).unwrap();
        assert!(!result.created);
        assert!(!result.wrote_config);
        assert!(dir.path().join("work").is_dir());
    }

    #[test]
    fn test_template_parses() {
        let toml = ChangeflowToml::parse(CONFIG_TEMPLATE).unwrap();
        assert!(toml.validate().is_empty());
    }
}
