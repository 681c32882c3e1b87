//! Lifecycle hooks run by the [`ModuleManager`](crate::ModuleManager) around
//! module initialization and shutdown.

use crate::error::{catch, ActorError, BoxError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    BeforeModuleInit,
    AfterModuleInit,
    BeforeModuleStop,
    AfterModuleStop,
}

impl HookType {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub type HookFn = Box<dyn FnMut() -> Result<(), BoxError> + Send>;

/// Hooks grouped by [`HookType`], executed in registration order.
#[derive(Default)]
pub struct Hooks {
    hooks: [Vec<HookFn>; HookType::COUNT],
}

impl Hooks {
    pub fn register<F>(&mut self, hook: HookType, f: F)
    where
        F: FnMut() -> Result<(), BoxError> + Send + 'static,
    {
        self.hooks[hook.index()].push(Box::new(f));
    }

    pub fn len(&self, hook: HookType) -> usize {
        self.hooks[hook.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.iter().all(Vec::is_empty)
    }

    /// Runs the hooks of the given type in registration order, stopping at
    /// the first one that fails.
    pub fn execute(&mut self, hook: HookType) -> Result<(), ActorError> {
        tracing::debug!(hook = %hook, count = self.len(hook), "Executing hooks");
        for f in self.hooks[hook.index()].iter_mut() {
            catch(|| f()).inspect_err(|err| tracing::error!(hook = %hook, error = %err, "Hook failed"))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("counts", &self.hooks.iter().map(Vec::len).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn hooks_stop_at_first_failure() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut hooks = Hooks::default();

        let r = runs.clone();
        hooks.register(HookType::AfterModuleInit, move || {
            r.fetch_add(1, Ordering::SeqCst);
            Err("first".into())
        });
        let r = runs.clone();
        hooks.register(HookType::AfterModuleInit, move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(hooks.execute(HookType::BeforeModuleInit).is_ok());
        let err = hooks.execute(HookType::AfterModuleInit).unwrap_err();
        assert!(matches!(err, ActorError::Failed(e) if e.to_string() == "first"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.len(HookType::AfterModuleInit), 2);
    }
}
