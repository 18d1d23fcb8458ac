//! Build a [`HookRegistry`] from `[[hooks]]` definitions.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;

use super::builtin::{CleanTreeHook, EnvCredentialHook, ToolAvailableHook};
use super::executor::CommandHook;
use super::manager::HookRegistry;
use super::types::{Hook, StageSelector};
use crate::flow_config::{HookDefinition, HookKind};

fn build_hook(def: &HookDefinition, clean_tree_excludes: &[PathBuf]) -> Result<Arc<dyn Hook>> {
    let hook: Arc<dyn Hook> = match def.kind {
        HookKind::ToolAvailable => {
            let hook = ToolAvailableHook::new(def.tools.clone());
            Arc::new(match &def.name {
                Some(name) => hook.named(name.clone()),
                None => hook,
            })
        }
        HookKind::CleanTree => {
            let hook = CleanTreeHook::new(clean_tree_excludes.to_vec());
            Arc::new(match &def.name {
                Some(name) => hook.named(name.clone()),
                None => hook,
            })
        }
        HookKind::EnvCredential => {
            let Some(var) = &def.var else {
                bail!("env_credential hook requires `var`");
            };
            let hook = EnvCredentialHook::new(var.clone());
            Arc::new(match &def.name {
                Some(name) => hook.named(name.clone()),
                None => hook,
            })
        }
        HookKind::Command => {
            let Some(command) = &def.command else {
                bail!("command hook requires `command`");
            };
            let name = def.name.clone().unwrap_or_else(|| "command".to_string());
            Arc::new(CommandHook::new(name, command.clone()))
        }
    };
    Ok(hook)
}

/// Build the registry for the configured hooks.
///
/// `clean_tree_excludes` are absolute directories the `clean_tree` kind ignores.
pub fn registry_from_config(
    definitions: &[HookDefinition],
    clean_tree_excludes: &[PathBuf],
) -> Result<HookRegistry> {
    let mut registry = HookRegistry::new();
    for (i, def) in definitions.iter().enumerate() {
        let hook = build_hook(def, clean_tree_excludes)
            .with_context(|| format!("Invalid hook #{}", i + 1))?;
        for stage in &def.stages {
            let selector: StageSelector = stage
                .parse()
                .with_context(|| format!("Invalid stage selector in hook #{}", i + 1))?;
            registry.register_shared(selector, hook.clone());
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_config::ChangeflowToml;
    use crate::stage::StageId;

    #[test]
    fn test_registry_from_config() {
        let toml = ChangeflowToml::parse(
            r#"
[[hooks]]
kind = "tool_available"
stages = ["test", "implement"]
tools = ["sh"]

[[hooks]]
kind = "env_credential"
name = "github-token"
stages = ["version_control"]
var = "GITHUB_TOKEN"

[[hooks]]
kind = "command"
command = "true"
"#,
        )
        .unwrap();
        let registry = registry_from_config(&toml.hooks, &[]).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.hooks_for(StageId::TEST), vec!["tool_available", "command"]);
        assert_eq!(
            registry.hooks_for(StageId::VERSION_CONTROL),
            vec!["github-token", "command"]
        );
    }

    #[test]
    fn test_env_credential_requires_var() {
        let toml = ChangeflowToml::parse(
            r#"
[[hooks]]
kind = "env_credential"
"#,
        )
        .unwrap();
        let err = registry_from_config(&toml.hooks, &[]).unwrap_err();
        assert!(format!("{:#}", err).contains("requires `var`"));
    }

    #[test]
    fn test_unknown_stage_selector_rejected() {
        let toml = ChangeflowToml::parse(
            r#"
[[hooks]]
kind = "clean_tree"
stages = ["deploy"]
"#,
        )
        .unwrap();
        assert!(registry_from_config(&toml.hooks, &[]).is_err());
    }
}
