//! Commit message check: `changeflow commit-msg`.

use dialoguer::Confirm;

use changeflow::commit::{propose_fix, validate};
use changeflow::errors::PipelineError;

use super::prompt_failed;

/// Validate `message`; with `fix`, offer a corrected message for confirmation.
///
/// The accepted message is printed on stdout so it can be piped into `git commit -F -`.
pub fn cmd_commit_msg(
    message: &str,
    fix: bool,
    no_verify: bool,
    yes: bool,
) -> Result<(), PipelineError> {
    if no_verify {
        println!("{}", message);
        return Ok(());
    }

    let result = validate(message);
    if result.ok {
        println!("{}", message);
        return Ok(());
    }
    eprintln!("Invalid commit message: {}", result.describe());
    if !fix {
        return Err(PipelineError::CommitFormat(format!(
            "{} (try --fix, or --no-verify to bypass)",
            result.describe()
        )));
    }

    let candidate = propose_fix(message);
    eprintln!("Proposed: {}", candidate);
    let accepted = yes
        || Confirm::new()
            .with_prompt("Use the proposed message?")
            .default(true)
            .interact()
            .map_err(|e| {
                eprintln!("Cannot prompt for confirmation; pass --yes to accept the proposal.");
                prompt_failed(e)
            })?;
    if !accepted {
        return Err(PipelineError::CommitFormat(format!(
            "{} (proposal rejected)",
            result.describe()
        )));
    }
    println!("{}", candidate);
    Ok(())
}
