//! # Module Manager
//!
//! Application features are written as [`Module`]s and registered with a
//! [`ModuleManager`]. The manager is itself the state of an
//! [`Object`](crate::Object): each tick advances a small state machine, so
//! every module callback runs on the same task and never needs a lock.
//!
//! ## Lifecycle
//!
//! ```text
//! Invalid --start()--> Init --> Update --close()--> Close --> Closing --> Closed --> Invalid
//! ```
//!
//! * **Init**: runs the `BeforeModuleInit` hooks, then `init` on every module
//!   in ascending priority order, then the `AfterModuleInit` hooks.
//! * **Update**: calls `update` on every module whose interval has elapsed.
//! * **Close**: runs the `BeforeModuleStop` hooks and calls `close` in
//!   *reverse* priority order.
//! * **Closing**: waits until every module has confirmed with
//!   [`ModuleContext::release`]. Modules that have not released yet keep
//!   being updated so they can finish asynchronous shutdown work. The names
//!   still outstanding are logged once per second.
//! * **Closed**: runs the `AfterModuleStop` hooks and fires the closed signal.

use crate::error::{guard, BoxError};
use crate::hook::{HookType, Hooks};
use crate::object::{Handle, Sinker};
use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// A unit of application functionality driven by the [`ModuleManager`].
///
/// None of the callbacks may block: they share one task with every other
/// module.
pub trait Module: Send + 'static {
    fn name(&self) -> &str;

    fn init(&mut self, ctx: &ModuleContext<'_>) -> Result<(), BoxError>;

    fn update(&mut self, ctx: &ModuleContext<'_>) -> Result<(), BoxError>;

    /// Begins shutdown. The module must eventually call
    /// [`ModuleContext::release`] (now or from a later `update`), otherwise
    /// the manager never reaches `Closed`.
    fn close(&mut self, ctx: &ModuleContext<'_>) -> Result<(), BoxError>;
}

/// Per-call view handed to module callbacks.
pub struct ModuleContext<'a> {
    name: &'a str,
    releases: &'a Sender<String>,
}

impl ModuleContext<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    /// Confirms that the module has finished closing.
    pub fn release(&self) {
        trace!(module = self.name, "Module released");
        let _ = self.releases.send(self.name.to_owned());
    }

    /// An owned releaser for modules that finish closing on another task.
    pub fn releaser(&self) -> Releaser {
        Releaser {
            name: self.name.to_owned(),
            releases: self.releases.clone(),
        }
    }
}

/// Owned form of [`ModuleContext::release`].
#[derive(Debug, Clone)]
pub struct Releaser {
    name: String,
    releases: Sender<String>,
}

impl Releaser {
    pub fn release(&self) {
        trace!(module = %self.name, "Module released");
        let _ = self.releases.send(self.name.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Invalid,
    Init,
    Update,
    Close,
    Closing,
    Closed,
}

struct Registered {
    name: String,
    module: Box<dyn Module>,
    interval: Duration,
    priority: i32,
    last_run: Instant,
}

/// Owns the registered modules and drives their lifecycle.
pub struct ModuleManager {
    state: ManagerState,
    modules: Vec<Registered>,
    hooks: Hooks,
    release_tx: Sender<String>,
    release_rx: Receiver<String>,
    last_report: Instant,
    is_closing: bool,
    closed: CancellationToken,
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleManager {
    pub fn new() -> Self {
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        Self {
            state: ManagerState::Invalid,
            modules: Vec::new(),
            hooks: Hooks::default(),
            release_tx,
            release_rx,
            last_report: Instant::now(),
            is_closing: false,
            closed: CancellationToken::new(),
        }
    }

    /// Registers a module. Lower `priority` values are initialized first and
    /// closed last; modules with equal priority keep registration order. A
    /// zero `interval` updates the module on every tick.
    pub fn register(&mut self, module: impl Module, interval: Duration, priority: i32) {
        self.register_boxed(Box::new(module), interval, priority)
    }

    pub fn register_boxed(&mut self, module: Box<dyn Module>, interval: Duration, priority: i32) {
        trace!(module = module.name(), ?interval, priority, "Module registered");
        let at = self
            .modules
            .iter()
            .position(|m| priority < m.priority)
            .unwrap_or(self.modules.len());
        self.modules.insert(
            at,
            Registered {
                name: module.name().to_owned(),
                module,
                interval,
                priority,
                last_run: Instant::now(),
            },
        );
    }

    pub fn register_hook<F>(&mut self, hook: HookType, f: F)
    where
        F: FnMut() -> Result<(), BoxError> + Send + 'static,
    {
        self.hooks.register(hook, f);
    }

    /// Module names in scheduling order.
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn start(&mut self) {
        trace!("Module manager start");
        self.state = ManagerState::Init;
    }

    /// Begins shutdown. Only the first call has an effect.
    pub fn close(&mut self) {
        trace!("Module manager close");
        if self.is_closing {
            return;
        }
        self.is_closing = true;
        self.state = ManagerState::Close;
    }

    /// Token cancelled once every module has released.
    pub fn closed_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Advances the state machine by one step.
    pub fn tick(&mut self) {
        match self.state {
            ManagerState::Invalid => {}
            ManagerState::Init => self.init(),
            ManagerState::Update => self.update(),
            ManagerState::Close => self.close_modules(),
            ManagerState::Closing => self.closing(),
            ManagerState::Closed => self.finish(),
        }
    }

    fn init(&mut self) {
        info!("Modules initializing");
        let _ = self.hooks.execute(HookType::BeforeModuleInit);
        for m in self.modules.iter_mut() {
            let ctx = ModuleContext {
                name: &m.name,
                releases: &self.release_tx,
            };
            debug!(module = ctx.name, "Module init");
            guard("module.init", ctx.name, || m.module.init(&ctx));
        }
        let _ = self.hooks.execute(HookType::AfterModuleInit);
        info!(count = self.modules.len(), "Modules initialized");
        self.state = ManagerState::Update;
    }

    fn update(&mut self) {
        let now = Instant::now();
        for m in self.modules.iter_mut() {
            if !m.interval.is_zero() && now.duration_since(m.last_run) < m.interval {
                continue;
            }
            m.last_run = now;
            let ctx = ModuleContext {
                name: &m.name,
                releases: &self.release_tx,
            };
            guard("module.update", ctx.name, || m.module.update(&ctx));
        }
    }

    fn close_modules(&mut self) {
        info!("Modules closing");
        let _ = self.hooks.execute(HookType::BeforeModuleStop);
        for m in self.modules.iter_mut().rev() {
            let ctx = ModuleContext {
                name: &m.name,
                releases: &self.release_tx,
            };
            debug!(module = ctx.name, "Module close");
            guard("module.close", ctx.name, || m.module.close(&ctx));
        }
        self.last_report = Instant::now();
        self.state = ManagerState::Closing;
    }

    fn closing(&mut self) {
        while let Ok(name) = self.release_rx.try_recv() {
            if let Some(at) = self.modules.iter().position(|m| m.name == name) {
                let m = self.modules.remove(at);
                debug!(module = %m.name, "Module closed");
            }
        }
        if self.modules.is_empty() {
            self.state = ManagerState::Closed;
            return;
        }
        if self.last_report.elapsed() >= REPORT_INTERVAL {
            self.last_report = Instant::now();
            warn!(pending = %self.names().join("|"), "Waiting for modules to release");
        }
        self.update();
    }

    fn finish(&mut self) {
        let _ = self.hooks.execute(HookType::AfterModuleStop);
        self.state = ManagerState::Invalid;
        info!("Modules closed");
        self.closed.cancel();
    }
}

impl Sinker for ModuleManager {
    fn on_tick(&mut self, _object: &Handle<Self>) -> Result<(), BoxError> {
        self.tick();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, Journal, MockModule};

    fn manager_with(journal: &Journal, modules: &[(&str, i32)]) -> ModuleManager {
        let mut manager = ModuleManager::new();
        for (name, priority) in modules {
            manager.register(MockModule::new(*name, journal.clone()), Duration::ZERO, *priority);
        }
        manager
    }

    #[test]
    fn registration_orders_by_priority() {
        let journal = Journal::default();
        let manager = manager_with(&journal, &[("p3", 3), ("p1", 1), ("p2", 2)]);
        assert_eq!(manager.names(), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn equal_priorities_keep_registration_order() {
        let journal = Journal::default();
        let manager = manager_with(&journal, &[("a", 1), ("b", 1), ("c", 0)]);
        assert_eq!(manager.names(), vec!["c", "a", "b"]);
    }

    #[test]
    fn init_then_update_then_reverse_close() {
        let journal = Journal::default();
        let mut manager = manager_with(&journal, &[("A", 5), ("B", 1)]);

        manager.start();
        manager.tick(); // init
        manager.tick(); // update
        manager.close();
        manager.tick(); // close
        manager.tick(); // closing: both released during close
        assert_eq!(manager.state(), ManagerState::Closed);
        manager.tick();
        assert_eq!(manager.state(), ManagerState::Invalid);
        assert!(manager.closed_signal().is_cancelled());

        assert_eq!(
            journal.calls(),
            vec![
                Call::Init("B".into()),
                Call::Init("A".into()),
                Call::Update("B".into()),
                Call::Update("A".into()),
                Call::Close("A".into()),
                Call::Close("B".into()),
            ]
        );
    }

    #[test]
    fn closing_waits_for_deferred_release() {
        let journal = Journal::default();
        let mut manager = ModuleManager::new();
        let slow = MockModule::new("slow", journal.clone()).defer_release();
        let releaser = slow.pending_release();
        manager.register(slow, Duration::ZERO, 0);

        manager.start();
        manager.tick();
        manager.close();
        manager.tick();
        for _ in 0..3 {
            manager.tick();
            assert_eq!(manager.state(), ManagerState::Closing);
        }
        // still updated while closing
        assert_eq!(journal.count(|c| matches!(c, Call::Update(_))), 3);

        releaser.lock().take().expect("releaser recorded").release();
        manager.tick();
        assert_eq!(manager.state(), ManagerState::Closed);
    }

    #[test]
    fn failing_module_does_not_stop_others() {
        let journal = Journal::default();
        let mut manager = ModuleManager::new();
        manager.register(MockModule::new("bad", journal.clone()).fail_init(), Duration::ZERO, 0);
        manager.register(MockModule::new("boom", journal.clone()).panic_update(), Duration::ZERO, 1);
        manager.register(MockModule::new("good", journal.clone()), Duration::ZERO, 2);

        manager.start();
        manager.tick();
        manager.tick();
        assert_eq!(manager.state(), ManagerState::Update);
        assert!(journal.calls().contains(&Call::Init("good".into())));
        assert!(journal.calls().contains(&Call::Update("good".into())));
    }

    #[test]
    fn hooks_wrap_init_and_stop() {
        let journal = Journal::default();
        let mut manager = manager_with(&journal, &[("m", 0)]);
        for hook in [
            HookType::BeforeModuleInit,
            HookType::AfterModuleInit,
            HookType::BeforeModuleStop,
            HookType::AfterModuleStop,
        ] {
            let journal = journal.clone();
            manager.register_hook(hook, move || {
                journal.push(Call::Hook(hook));
                Ok(())
            });
        }

        manager.start();
        manager.tick();
        manager.close();
        manager.tick();
        manager.tick();
        manager.tick();

        assert_eq!(
            journal.calls(),
            vec![
                Call::Hook(HookType::BeforeModuleInit),
                Call::Init("m".into()),
                Call::Hook(HookType::AfterModuleInit),
                Call::Hook(HookType::BeforeModuleStop),
                Call::Close("m".into()),
                Call::Hook(HookType::AfterModuleStop),
            ]
        );
    }

    #[test]
    fn close_twice_is_ignored() {
        let journal = Journal::default();
        let mut manager = manager_with(&journal, &[("m", 0)]);
        manager.start();
        manager.tick();
        manager.close();
        manager.tick();
        manager.close();
        assert_eq!(manager.state(), ManagerState::Closing);
    }
}
