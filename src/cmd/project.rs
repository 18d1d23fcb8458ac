//! Project initialization command: `changeflow init`.

use std::path::Path;

use changeflow::errors::PipelineError;

pub fn cmd_init(project_dir: &Path) -> Result<(), PipelineError> {
    use changeflow::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized changeflow project at {}",
            result.changeflow_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .changeflow/");
        println!("  ├── changeflow.toml  # Lanes, tools, hooks and scheduler settings");
        println!("  ├── state/           # Status records and checkpoints per change");
        println!("  └── logs/            # Daily log files");
        println!();
        println!("Next steps:");
        println!("  1. Configure [tools] in .changeflow/changeflow.toml for the quality gate");
        println!("  2. Run `changeflow lanes` to review the lanes");
        println!("  3. Run `changeflow run <change-id>` to drive a change through its lane");
    } else if was_initialized {
        println!(
            "Changeflow project already initialized at {}",
            result.changeflow_dir.display()
        );
        if result.wrote_config {
            println!("Restored missing changeflow.toml.");
        }
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed changeflow initialization at {}",
            result.changeflow_dir.display()
        );
    }

    Ok(())
}
