//! # Commands
//!
//! A command is a unit of work executed on an [`Object`](crate::Object)'s
//! task with exclusive access to its state. Closures are commands, so most
//! callers never name this trait:
//!
//! ```rust
//! use cube_actor::{Object, Options, Sinker};
//!
//! #[derive(Default)]
//! struct Counter(u32);
//! impl Sinker for Counter {}
//!
//! # #[tokio::main] async fn main() {
//! let (object, handle) = Object::new("counter", Options::default(), Counter::default());
//! tokio::spawn(object.run());
//! handle.send_fn(|counter, _| {
//!     counter.0 += 1;
//!     Ok(())
//! }).unwrap();
//! handle.close();
//! handle.closed().await;
//! # }
//! ```

use crate::error::BoxError;
use crate::object::Handle;

/// Work executed sequentially on an object's task.
pub trait Command<S>: Send + 'static {
    fn done(self: Box<Self>, state: &mut S, object: &Handle<S>) -> Result<(), BoxError>;
}

impl<S, F> Command<S> for F
where
    F: FnOnce(&mut S, &Handle<S>) -> Result<(), BoxError> + Send + 'static,
{
    fn done(self: Box<Self>, state: &mut S, object: &Handle<S>) -> Result<(), BoxError> {
        (*self)(state, object)
    }
}

/// No-op command. [`Handle::close`] enqueues one so a parked object wakes up
/// and re-evaluates its stop condition.
#[derive(Debug, Default, Clone, Copy)]
pub struct NilCommand;

impl<S> Command<S> for NilCommand {
    fn done(self: Box<Self>, _state: &mut S, _object: &Handle<S>) -> Result<(), BoxError> {
        Ok(())
    }
}
