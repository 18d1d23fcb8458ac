//! Pre-stage validation hooks.
//!
//! A hook is a named precondition checked before a stage starts. Hooks are
//! registered against a [`StageSelector`] and run in registration order; the
//! first failing hook blocks the stage with
//! [`PipelineError::HookValidation`](crate::errors::PipelineError::HookValidation).
//!
//! # Built-in kinds
//!
//! - `tool_available` - the listed executables can be found on `PATH`
//! - `clean_tree` - the git working tree has no uncommitted changes outside
//!   the changes directory and `.changeflow/`
//! - `env_credential` - an environment variable is set and non-empty
//! - `command` - a shell command receiving the JSON [`HookContext`] on stdin;
//!   exit code 0 passes, anything else blocks with its stderr as the reason
//!
//! # Configuration
//!
//! ```toml
//! [[hooks]]
//! kind = "tool_available"
//! stages = ["test"]
//! tools = ["cargo"]
//!
//! [[hooks]]
//! kind = "command"
//! name = "ticket-linked"
//! stages = ["version_control"]
//! command = "./scripts/check-ticket.sh"
//! ```

pub mod builtin;
pub mod config;
pub mod executor;
pub mod manager;
pub mod types;

pub use builtin::{CleanTreeHook, EnvCredentialHook, ToolAvailableHook};
pub use config::registry_from_config;
pub use executor::CommandHook;
pub use manager::HookRegistry;
pub use types::{Hook, HookContext, StageSelector};
