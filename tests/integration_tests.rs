//! Integration tests for changeflow
//!
//! These drive the compiled binary against temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a changeflow Command
fn changeflow() -> Command {
    let mut cmd = cargo_bin_cmd!("changeflow");
    cmd.env_remove("CHANGEFLOW_WORKERS")
        .env_remove("CHANGEFLOW_AGENT_CMD")
        .env_remove("CHANGEFLOW_CHANGES_DIR")
        .env_remove("RUST_LOG");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn sh_tool(json: &str) -> String {
    format!("command = [\"sh\", \"-c\", \"echo '{}'\"]\n", json)
}

/// Initialize a project whose tools report `coverage` and whose commit stage is a no-op.
fn init_project_with_tools(dir: &TempDir, coverage: u32) {
    changeflow()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    let summary = format!(r#"{{\"passed\": 10, \"total\": 10, \"coverage\": {}}}"#, coverage);
    let mut config = String::from("[project]\nchanges_dir = \"changes\"\n\n");
    for tool in ["lint", "type_check", "tests", "security"] {
        config.push_str(&format!("[tools.{}]\n", tool));
        config.push_str(&sh_tool(&summary));
        config.push('\n');
    }
    config.push_str("[stages.version_control]\ncommand = [\"true\"]\n");
    fs::write(dir.path().join(".changeflow/changeflow.toml"), config).unwrap();
}

/// Id of the single checkpoint saved for stage `index` of `change_id`.
fn checkpoint_id(dir: &TempDir, change_id: &str, index: u8) -> String {
    let prefix = format!("{:02}-", index);
    let root = dir
        .path()
        .join(".changeflow/state")
        .join(change_id)
        .join("checkpoints");
    let mut ids: Vec<String> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(&prefix))
        .collect();
    assert_eq!(ids.len(), 1, "expected one checkpoint for stage {}", index);
    ids.remove(0)
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_changeflow_help() {
        changeflow().arg("--help").assert().success();
    }

    #[test]
    fn test_changeflow_version() {
        changeflow().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_subcommand_is_invalid_invocation() {
        changeflow().arg("frobnicate").assert().code(3);
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        changeflow()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized changeflow project"));

        assert!(dir.path().join(".changeflow/changeflow.toml").is_file());
        assert!(dir.path().join(".changeflow/state").is_dir());
        assert!(dir.path().join(".changeflow/logs").is_dir());
        assert!(dir.path().join("changes").is_dir());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        changeflow().current_dir(dir.path()).arg("init").assert().success();

        changeflow()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_lanes_lists_all_three() {
        let dir = create_temp_project();

        changeflow()
            .current_dir(dir.path())
            .arg("lanes")
            .assert()
            .success()
            .stdout(predicate::str::contains("light"))
            .stdout(predicate::str::contains("standard (default)"))
            .stdout(predicate::str::contains("strict"))
            .stdout(predicate::str::contains("advisory"));
    }

    #[test]
    fn test_detect_outside_git_suggests_standard() {
        let dir = create_temp_project();

        changeflow()
            .current_dir(dir.path())
            .arg("detect")
            .assert()
            .success()
            .stdout(predicate::str::contains("Suggested lane: standard"));
    }
}

// =============================================================================
// Commit message validation
// =============================================================================

mod commit_msg {
    use super::*;

    #[test]
    fn test_valid_message_passes() {
        changeflow()
            .args(["commit-msg", "feat(auth): add login form"])
            .assert()
            .success()
            .stdout(predicate::str::contains("feat(auth): add login form"));
    }

    #[test]
    fn test_invalid_message_fails() {
        changeflow()
            .args(["commit-msg", "fixed stuff"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("--fix"));
    }

    #[test]
    fn test_fix_with_yes_prints_proposal() {
        changeflow()
            .args(["commit-msg", "fixed stuff", "--fix", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("fix: stuff"));
    }

    #[test]
    fn test_fix_without_terminal_is_an_error_not_a_rejection() {
        changeflow()
            .args(["commit-msg", "fixed stuff", "--fix"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("--yes"))
            .stderr(predicate::str::contains("not a terminal"))
            .stderr(predicate::str::contains("proposal rejected").not());
    }

    #[test]
    fn test_no_verify_bypasses() {
        changeflow()
            .args(["commit-msg", "whatever", "--no-verify"])
            .assert()
            .success();
    }
}

// =============================================================================
// Invocation errors
// =============================================================================

mod invocation {
    use super::*;

    #[test]
    fn test_unknown_lane_exits_3() {
        let dir = create_temp_project();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--lane", "turbo"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("turbo"));
    }

    #[test]
    fn test_workers_out_of_range_exits_3() {
        let dir = create_temp_project();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--workers", "9"])
            .assert()
            .code(3);
    }

    #[test]
    fn test_no_parallel_conflicts_with_workers() {
        let dir = create_temp_project();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--no-parallel", "--workers", "2"])
            .assert()
            .code(3);
    }

    #[test]
    fn test_invalid_change_id_exits_3() {
        let dir = create_temp_project();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "archive"])
            .assert()
            .code(3);
    }

    #[test]
    fn test_invalid_run_message_rejected_before_any_stage() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 90);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--message", "fixed stuff", "--ui", "quiet"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("fix: stuff"));

        assert!(!dir.path().join(".changeflow/state/add-login/status.json").exists());
    }
}

// =============================================================================
// Pipeline runs
// =============================================================================

mod pipeline {
    use super::*;

    #[test]
    fn test_light_lane_run_completes() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 90);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--lane", "light", "--ui", "quiet"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[00 proposal] drafted proposal.md"))
            .stdout(predicate::str::contains("[05 test] quality gate PASS"))
            .stdout(predicate::str::contains("[08 archive] done"))
            .stdout(predicate::str::contains("completed on lane light"));

        assert!(dir.path().join("changes/add-login/proposal.md").is_file());
        assert!(!dir.path().join("changes/add-login/spec.md").exists());
    }

    #[test]
    fn test_status_json_after_run() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 90);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--lane", "light", "--ui", "quiet"])
            .assert()
            .success();

        let output = changeflow()
            .current_dir(dir.path())
            .args(["status", "add-login", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(record["status"], "completed");
        assert_eq!(record["lane"], "light");
        assert_eq!(record["completed_stages"], serde_json::json!([0, 2, 4, 5, 7, 8]));
    }

    #[test]
    fn test_second_run_without_resume_exits_3() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 90);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--lane", "light", "--ui", "quiet"])
            .assert()
            .success();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--lane", "light", "--ui", "quiet"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("--resume"));
    }

    #[test]
    fn test_resume_of_completed_run_is_noop() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 90);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--lane", "light", "--ui", "quiet"])
            .assert()
            .success();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--resume", "--ui", "quiet"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already complete"));
    }

    #[test]
    fn test_standard_lane_gate_failure_exits_2() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 50);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--ui", "quiet", "--workers", "2"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("coverage"));

        let output = changeflow()
            .current_dir(dir.path())
            .args(["status", "add-login", "--json"])
            .output()
            .unwrap();
        let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(record["status"], "halted");
        assert_eq!(record["resumable"], true);
        assert_eq!(record["failed_stages"], serde_json::json!([5]));
    }

    #[test]
    fn test_restore_then_resume_completes_run() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 50);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--ui", "quiet"])
            .assert()
            .code(2);

        let spec = checkpoint_id(&dir, "add-login", 2);
        changeflow()
            .current_dir(dir.path())
            .args(["checkpoints", "restore", "add-login", &spec])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("Restored {}", spec)))
            .stdout(predicate::str::contains("Run rewound"));

        assert!(dir.path().join("changes/add-login/spec.md").is_file());
        assert!(!dir.path().join("changes/add-login/tasks.md").exists());

        let output = changeflow()
            .current_dir(dir.path())
            .args(["status", "add-login", "--json"])
            .output()
            .unwrap();
        let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(record["status"], "halted");
        assert_eq!(record["completed_stages"], serde_json::json!([0, 1, 2]));

        // raise coverage so the gate passes on the resumed run
        init_project_with_tools(&dir, 90);
        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--resume", "--ui", "quiet"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[03 tasks]"))
            .stdout(predicate::str::contains("[02 spec]").not());

        let output = changeflow()
            .current_dir(dir.path())
            .args(["status", "add-login", "--json"])
            .output()
            .unwrap();
        let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(record["status"], "completed");
        assert!(dir.path().join("changes/add-login/tasks.md").is_file());
    }

    #[test]
    fn test_restore_hides_later_checkpoints_from_default_list() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 50);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--ui", "quiet"])
            .assert()
            .code(2);

        let spec = checkpoint_id(&dir, "add-login", 2);
        let tasks = checkpoint_id(&dir, "add-login", 3);
        let plan = checkpoint_id(&dir, "add-login", 4);
        changeflow()
            .current_dir(dir.path())
            .args(["checkpoints", "restore", "add-login", &spec])
            .assert()
            .success();

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoints", "list", "add-login"])
            .assert()
            .success()
            .stdout(predicate::str::contains(spec.as_str()))
            .stdout(predicate::str::contains(tasks.as_str()).not())
            .stdout(predicate::str::contains(plan.as_str()).not())
            .stdout(predicate::str::contains("(superseded)").not());

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoints", "list", "add-login", "--all"])
            .assert()
            .success()
            .stdout(predicate::str::contains(spec.as_str()))
            .stdout(predicate::str::contains(tasks.as_str()))
            .stdout(predicate::str::contains(plan.as_str()))
            .stdout(predicate::str::contains("(superseded)"));
    }

    #[test]
    fn test_checkpoints_list_after_run() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 90);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "add-login", "--lane", "light", "--ui", "quiet"])
            .assert()
            .success();

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoints", "list", "add-login"])
            .assert()
            .success()
            .stdout(predicate::str::contains("proposal"))
            .stdout(predicate::str::contains("archive"));
    }
}

// =============================================================================
// Standalone gate and configuration
// =============================================================================

mod gate_and_config {
    use super::*;

    #[test]
    fn test_gate_passes_with_good_metrics() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 90);

        changeflow()
            .current_dir(dir.path())
            .args(["gate", "add-login", "--lane", "strict"])
            .assert()
            .success()
            .stdout(predicate::str::contains("PASS"));
    }

    #[test]
    fn test_gate_fails_below_coverage() {
        let dir = create_temp_project();
        init_project_with_tools(&dir, 50);

        changeflow()
            .current_dir(dir.path())
            .args(["gate", "add-login"])
            .assert()
            .code(2);
    }

    #[test]
    fn test_config_init_and_validate() {
        let dir = create_temp_project();

        changeflow()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created changeflow.toml"));

        changeflow()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_unknown_lane() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".changeflow")).unwrap();
        fs::write(
            dir.path().join(".changeflow/changeflow.toml"),
            "[lanes.turbo]\nadvisory = true\n",
        )
        .unwrap();

        changeflow()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Unknown lane 'turbo'"));
    }
}
