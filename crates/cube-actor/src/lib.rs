//! # Cube Actor
//!
//! Building blocks for a single-threaded application core on top of tokio:
//!
//! 1. **[`Object`]**: a task that owns some state and executes [`Command`]s
//!    against it one at a time, with an optional periodic tick.
//! 2. **[`ModuleManager`]**: an object state that schedules application
//!    [`Module`]s by priority and coordinates their shutdown.
//! 3. **[`Timers`]**: delayed and periodic commands aimed at an object.
//!
//! ## Concurrency Model
//!
//! - Any task or thread may hold a [`Handle`] and enqueue commands
//! - Commands run **sequentially** on the object's task (no locks around the state)
//! - A command that fails or panics is logged and the object keeps running
//! - Closing drains every command enqueued before the close request
//!
//! ```rust
//! use cube_actor::{Object, Options, Sinker};
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct Ticks(u32);
//!
//! impl Sinker for Ticks {
//!     fn on_tick(&mut self, _: &cube_actor::Handle<Self>) -> Result<(), cube_actor::BoxError> {
//!         self.0 += 1;
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main] async fn main() {
//! let options = Options::with_interval(Duration::from_millis(10));
//! let (object, handle) = Object::new("ticks", options, Ticks::default());
//! tokio::spawn(object.run());
//! tokio::time::sleep(Duration::from_millis(50)).await;
//! handle.close();
//! handle.closed().await;
//! # }
//! ```
//!
//! ## Testing
//!
//! The [`mock`] module provides a journaling [`MockModule`](mock::MockModule)
//! for driving a [`ModuleManager`] by hand in deterministic unit tests.

pub mod command;
pub mod error;
pub mod hook;
pub mod mock;
pub mod module;
pub mod object;
pub mod timer;

pub use command::{Command, NilCommand};
pub use error::{catch, guard, ActorError, BoxError};
pub use hook::{HookFn, HookType, Hooks};
pub use module::{ManagerState, Module, ModuleContext, ModuleManager, Releaser};
pub use object::{Handle, Object, Options, Sinker, State, MIN_INTERVAL};
pub use timer::{TimerId, Timers};
