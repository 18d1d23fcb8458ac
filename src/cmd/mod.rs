//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module        | Commands handled                       |
//! |---------------|----------------------------------------|
//! | `run`         | `Run`                                  |
//! | `status`      | `Status`, `Reset`                      |
//! | `checkpoints` | `Checkpoints list / restore / prune`   |
//! | `gate`        | `Gate`                                 |
//! | `commit_msg`  | `CommitMsg`                            |
//! | `lanes`       | `Lanes`, `Detect`                      |
//! | `project`     | `Init`                                 |
//! | `config`      | `Config`                               |

use changeflow::errors::PipelineError;

pub mod checkpoints;
pub mod commit_msg;
pub mod config;
pub mod gate;
pub mod lanes;
pub mod project;
pub mod run;
pub mod status;

pub use checkpoints::cmd_checkpoints;
pub use commit_msg::cmd_commit_msg;
pub use config::cmd_config;
pub use gate::cmd_gate;
pub use lanes::{cmd_detect, cmd_lanes};
pub use project::cmd_init;
pub use run::{RunArgs, cmd_run};
pub use status::{cmd_reset, cmd_status};

/// A prompt that cannot be shown (no terminal) is an I/O failure, not a "no".
pub(crate) fn prompt_failed(err: dialoguer::Error) -> PipelineError {
    PipelineError::io("<terminal>", std::io::Error::from(err))
}
