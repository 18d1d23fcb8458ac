//! The hook registry.

use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{Hook, HookContext, StageSelector};
use crate::errors::PipelineError;
use crate::stage::StageId;

/// Ordered collection of `(selector, hook)` pairs.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: Vec<(StageSelector, Arc<dyn Hook>)>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, selector: StageSelector, hook: impl Hook + 'static) {
        self.hooks.push((selector, Arc::new(hook)));
    }

    pub(crate) fn register_shared(&mut self, selector: StageSelector, hook: Arc<dyn Hook>) {
        self.hooks.push((selector, hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Names of the hooks that apply to `stage`, in run order.
    pub fn hooks_for(&self, stage: StageId) -> Vec<&str> {
        self.hooks
            .iter()
            .filter(|(selector, _)| selector.matches(stage))
            .map(|(_, hook)| hook.name())
            .collect()
    }

    /// Run every hook registered for `ctx.stage`; the first failure blocks the stage.
    pub fn run_hooks(&self, ctx: &HookContext) -> Result<(), PipelineError> {
        for (selector, hook) in &self.hooks {
            if !selector.matches(ctx.stage) {
                continue;
            }
            debug!(hook = hook.name(), stage = %ctx.stage, "Running pre-stage hook");
            if let Err(reason) = hook.check(ctx) {
                warn!(hook = hook.name(), stage = %ctx.stage, %reason, "Hook blocked stage");
                return Err(PipelineError::HookValidation {
                    hook: hook.name().to_string(),
                    stage: ctx.stage,
                    reason,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.hooks
                    .iter()
                    .map(|(selector, hook)| format!("{}:{}", selector, hook.name())),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        result: Result<(), &'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl Hook for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn check(&self, _ctx: &HookContext) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.map_err(str::to_string)
        }
    }

    fn ctx(stage: StageId) -> HookContext {
        HookContext {
            change_id: "c".into(),
            stage,
            stage_name: stage.name().into(),
            lane: "standard".into(),
            change_dir: PathBuf::from("changes/c"),
            project_dir: PathBuf::from("."),
        }
    }

    #[test]
    fn test_run_hooks_short_circuits_on_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(
            StageSelector::Any,
            Fixed {
                name: "ok",
                result: Ok(()),
                calls: calls.clone(),
            },
        );
        registry.register(
            StageSelector::Stage(StageId::VERSION_CONTROL),
            Fixed {
                name: "clean_tree",
                result: Err("2 uncommitted files"),
                calls: calls.clone(),
            },
        );
        registry.register(
            StageSelector::Any,
            Fixed {
                name: "never",
                result: Ok(()),
                calls: calls.clone(),
            },
        );

        let err = registry.run_hooks(&ctx(StageId::VERSION_CONTROL)).unwrap_err();
        match err {
            PipelineError::HookValidation { hook, stage, reason } => {
                assert_eq!(hook, "clean_tree");
                assert_eq!(stage, StageId::VERSION_CONTROL);
                assert_eq!(reason, "2 uncommitted files");
            }
            other => panic!("Expected HookValidation, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hooks_only_run_for_selected_stages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(
            StageSelector::Stage(StageId::VERSION_CONTROL),
            Fixed {
                name: "blocker",
                result: Err("no"),
                calls: calls.clone(),
            },
        );
        assert!(registry.run_hooks(&ctx(StageId::TEST)).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.hooks_for(StageId::VERSION_CONTROL), vec!["blocker"]);
        assert!(registry.hooks_for(StageId::TEST).is_empty());
    }

    #[test]
    fn test_empty_registry_passes() {
        assert!(HookRegistry::new().run_hooks(&ctx(StageId::PROPOSAL)).is_ok());
    }
}
