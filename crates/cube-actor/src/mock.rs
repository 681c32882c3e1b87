//! # Mock Modules & Testing Guide
//!
//! [`MockModule`] is a scriptable [`Module`] that records every lifecycle
//! call into a shared [`Journal`]. It lets you assert ordering (priority,
//! reverse close) and inject faults without writing a module per test.
//!
//! ## When to use Mocks vs Real Modules
//!
//! | Feature | MockModule | Real Module |
//! |---------|------------|-------------|
//! | **Speed** | Instant | Depends on the module |
//! | **Determinism** | Drive `ModuleManager::tick` by hand | Subject to the object's ticker |
//! | **Fault Injection** | `fail_init`, `panic_update` | Hard |
//! | **Use Case** | Scheduling and shutdown logic | Feature behavior |
//!
//! ## Example
//!
//! ```rust
//! use cube_actor::mock::{Call, Journal, MockModule};
//! use cube_actor::ModuleManager;
//! use std::time::Duration;
//!
//! let journal = Journal::default();
//! let mut manager = ModuleManager::new();
//! manager.register(MockModule::new("late", journal.clone()), Duration::ZERO, 10);
//! manager.register(MockModule::new("early", journal.clone()), Duration::ZERO, 1);
//!
//! manager.start();
//! manager.tick();
//! assert_eq!(
//!     journal.calls(),
//!     vec![Call::Init("early".into()), Call::Init("late".into())]
//! );
//! ```
//!
//! ## Deferred Release
//!
//! A module that finishes closing asynchronously is simulated with
//! [`MockModule::defer_release`]: `close` stores a [`Releaser`] in the slot
//! returned by [`MockModule::pending_release`] instead of releasing, and the
//! test releases it whenever it wants.

use crate::error::BoxError;
use crate::hook::HookType;
use crate::module::{Module, ModuleContext, Releaser};
use parking_lot::Mutex;
use std::sync::Arc;

/// A recorded lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init(String),
    Update(String),
    Close(String),
    Hook(HookType),
}

/// Shared, ordered record of calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    pub fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

pub type ReleaseSlot = Arc<Mutex<Option<Releaser>>>;

/// Scriptable module that journals its lifecycle.
pub struct MockModule {
    name: String,
    journal: Journal,
    fail_init: bool,
    panic_update: bool,
    defer_release: bool,
    pending: ReleaseSlot,
}

impl MockModule {
    pub fn new(name: impl Into<String>, journal: Journal) -> Self {
        Self {
            name: name.into(),
            journal,
            fail_init: false,
            panic_update: false,
            defer_release: false,
            pending: ReleaseSlot::default(),
        }
    }

    /// `init` returns an error after journaling the call.
    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// `update` panics after journaling the call.
    pub fn panic_update(mut self) -> Self {
        self.panic_update = true;
        self
    }

    /// `close` parks a releaser instead of releasing immediately.
    pub fn defer_release(mut self) -> Self {
        self.defer_release = true;
        self
    }

    pub fn pending_release(&self) -> ReleaseSlot {
        Arc::clone(&self.pending)
    }
}

impl Module for MockModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, _ctx: &ModuleContext<'_>) -> Result<(), BoxError> {
        self.journal.push(Call::Init(self.name.clone()));
        if self.fail_init {
            return Err(format!("{} refused to init", self.name).into());
        }
        Ok(())
    }

    fn update(&mut self, _ctx: &ModuleContext<'_>) -> Result<(), BoxError> {
        self.journal.push(Call::Update(self.name.clone()));
        if self.panic_update {
            panic!("{} panicked in update", self.name);
        }
        Ok(())
    }

    fn close(&mut self, ctx: &ModuleContext<'_>) -> Result<(), BoxError> {
        self.journal.push(Call::Close(self.name.clone()));
        if self.defer_release {
            *self.pending.lock() = Some(ctx.releaser());
        } else {
            ctx.release();
        }
        Ok(())
    }
}
