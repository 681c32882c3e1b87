//! # Object
//!
//! An [`Object`] is a single-task actor: it owns a piece of state `S`, drains
//! a mailbox of [`Command`]s in FIFO order and optionally ticks the state at a
//! fixed interval. The returned [`Handle`] is the cheap, cloneable "client"
//! half used to talk to it from anywhere.
//!
//! # Usage Pattern
//!
//! 1.  **Create**: `Object::new()` returns the `object` (server) and its `handle`.
//! 2.  **Run**: spawn `object.run()` on the tokio runtime.
//! 3.  **Use**: send commands through the handle, then `close()` and await `closed()`.
//!
//! ```rust
//! use cube_actor::{Object, Options, Sinker};
//!
//! #[derive(Default)]
//! struct Numbers(Vec<i32>);
//! impl Sinker for Numbers {}
//!
//! # #[tokio::main] async fn main() {
//! let (object, handle) = Object::new("numbers", Options::default(), Numbers::default());
//! tokio::spawn(object.run());
//!
//! for n in 1..=3 {
//!     handle.send_fn(move |numbers, _| {
//!         numbers.0.push(n);
//!         Ok(())
//!     }).unwrap();
//! }
//! handle.close();
//! handle.closed().await;
//! assert_eq!(handle.state().done, 4); // three pushes plus the close wakeup
//! # }
//! ```
//!
//! # Stop Condition
//!
//! `close()` only flips a flag and enqueues a [`NilCommand`]. The run loop
//! keeps draining until the flag is set *and* every command that was
//! enqueued has been executed, so nothing sent before `close()` is lost.

use crate::command::{Command, NilCommand};
use crate::error::{guard, ActorError, BoxError};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Shortest tick period an object accepts.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Object settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Options {
    /// Tick period in milliseconds. Zero disables ticking; positive values
    /// below [`MIN_INTERVAL`] are raised to it.
    #[serde(default, deserialize_with = "millis")]
    pub interval: Duration,
}

impl Options {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }.normalized()
    }

    pub fn normalized(mut self) -> Self {
        if !self.interval.is_zero() && self.interval < MIN_INTERVAL {
            self.interval = MIN_INTERVAL;
        }
        self
    }
}

fn millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

/// Lifecycle callbacks of the state owned by an object.
///
/// All of them run on the object's task; an error or panic is logged and
/// the loop carries on.
pub trait Sinker: Sized + Send + 'static {
    fn on_start(&mut self, _object: &Handle<Self>) -> Result<(), BoxError> {
        Ok(())
    }

    fn on_tick(&mut self, _object: &Handle<Self>) -> Result<(), BoxError> {
        Ok(())
    }

    fn on_stop(&mut self, _object: &Handle<Self>) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Mailbox counters reported by [`Handle::state`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct State {
    pub queue_len: usize,
    pub enqueued: u64,
    pub done: u64,
}

struct Shared<S> {
    name: String,
    sender: Sender<Box<dyn Command<S>>>,
    wake: Notify,
    sent: AtomicU64,
    done: AtomicU64,
    closing: AtomicBool,
    closed: CancellationToken,
}

/// The cloneable sending half of an [`Object`].
pub struct Handle<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Send + 'static> fmt::Debug for Handle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<S: Send + 'static> Handle<S> {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueues a command. Commands are executed in the order they were
    /// enqueued. Fails only once the object's task is gone.
    pub fn send(&self, command: impl Command<S>) -> Result<(), ActorError> {
        self.send_boxed(Box::new(command))
    }

    pub fn send_boxed(&self, command: Box<dyn Command<S>>) -> Result<(), ActorError> {
        self.shared.sent.fetch_add(1, Ordering::SeqCst);
        if self.shared.sender.send(command).is_err() {
            self.shared.sent.fetch_sub(1, Ordering::SeqCst);
            return Err(ActorError::Closed(self.shared.name.clone()));
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Enqueues a closure as a command.
    pub fn send_fn<F>(&self, f: F) -> Result<(), ActorError>
    where
        F: FnOnce(&mut S, &Handle<S>) -> Result<(), BoxError> + Send + 'static,
    {
        self.send(f)
    }

    /// Requests a stop. Idempotent; commands already enqueued still run.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(object = %self.shared.name, "Close requested");
        let _ = self.send(NilCommand);
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once the run loop has exited and `on_stop` has returned.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    pub fn state(&self) -> State {
        State {
            queue_len: self.shared.sender.len(),
            enqueued: self.shared.sent.load(Ordering::SeqCst),
            done: self.shared.done.load(Ordering::SeqCst),
        }
    }

    fn can_stop(&self) -> bool {
        self.is_closing()
            && self.shared.sent.load(Ordering::SeqCst) == self.shared.done.load(Ordering::SeqCst)
    }
}

/// The receiving half: owns the state and the mailbox.
pub struct Object<S: Sinker> {
    state: S,
    mailbox: Receiver<Box<dyn Command<S>>>,
    handle: Handle<S>,
    interval: Duration,
}

impl<S: Sinker> Object<S> {
    pub fn new(name: impl Into<String>, options: Options, state: S) -> (Self, Handle<S>) {
        let (sender, mailbox) = crossbeam_channel::unbounded();
        let handle = Handle {
            shared: Arc::new(Shared {
                name: name.into(),
                sender,
                wake: Notify::new(),
                sent: AtomicU64::new(0),
                done: AtomicU64::new(0),
                closing: AtomicBool::new(false),
                closed: CancellationToken::new(),
            }),
        };
        let object = Self {
            state,
            mailbox,
            handle: handle.clone(),
            interval: options.normalized().interval,
        };
        (object, handle)
    }

    pub fn handle(&self) -> &Handle<S> {
        &self.handle
    }

    /// Runs the object until it has been closed and its mailbox drained.
    pub async fn run(mut self) {
        let shared = Arc::clone(&self.handle.shared);
        trace!(object = %shared.name, "Object running");

        let handle = &self.handle;
        let state = &mut self.state;
        guard("object.start", &shared.name, || state.on_start(handle));

        let mut next_tick = (!self.interval.is_zero()).then(|| Instant::now() + self.interval);
        while !self.handle.can_stop() {
            match self.mailbox.try_recv() {
                Ok(command) => {
                    self.execute(command);
                    // due ticks interleave with a busy mailbox
                    if next_tick.is_some_and(|at| Instant::now() >= at) {
                        next_tick = Some(self.tick());
                    }
                }
                Err(_) => match next_tick {
                    Some(at) => {
                        let ticked = tokio::select! {
                            _ = shared.wake.notified() => false,
                            _ = time::sleep_until(at) => true,
                        };
                        if ticked {
                            next_tick = Some(self.tick());
                        }
                    }
                    None => shared.wake.notified().await,
                },
            }
        }

        let handle = &self.handle;
        let state = &mut self.state;
        guard("object.stop", &shared.name, || state.on_stop(handle));
        debug!(object = %shared.name, done = shared.done.load(Ordering::SeqCst), "Object stopped");
        shared.closed.cancel();
    }

    fn execute(&mut self, command: Box<dyn Command<S>>) {
        let handle = &self.handle;
        let state = &mut self.state;
        guard("command", &handle.shared.name, || command.done(state, handle));
        handle.shared.done.fetch_add(1, Ordering::SeqCst);
    }

    /// Runs `on_tick` and returns the next deadline.
    fn tick(&mut self) -> Instant {
        let handle = &self.handle;
        let state = &mut self.state;
        guard("object.tick", &handle.shared.name, || state.on_tick(handle));
        Instant::now() + self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;
    impl Sinker for Nothing {}

    #[test]
    fn options_clamp_short_intervals() {
        assert_eq!(Options::with_interval(Duration::from_millis(1)).interval, MIN_INTERVAL);
        assert_eq!(Options::with_interval(Duration::ZERO).interval, Duration::ZERO);
        assert_eq!(
            Options::with_interval(Duration::from_millis(250)).interval,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn options_deserialize_milliseconds() {
        let options: Options = serde_json::from_str(r#"{"interval": 100}"#).unwrap();
        assert_eq!(options.interval, Duration::from_millis(100));
        let options: Options = serde_json::from_str("{}").unwrap();
        assert_eq!(options.interval, Duration::ZERO);
    }

    #[test]
    fn state_counts_enqueued_commands() {
        let (_object, handle) = Object::new("idle", Options::default(), Nothing);
        handle.send_fn(|_, _| Ok(())).unwrap();
        handle.send_fn(|_, _| Ok(())).unwrap();
        let state = handle.state();
        assert_eq!(state.queue_len, 2);
        assert_eq!(state.enqueued, 2);
        assert_eq!(state.done, 0);
    }

    #[test]
    fn send_fails_after_object_dropped() {
        let (object, handle) = Object::new("gone", Options::default(), Nothing);
        drop(object);
        assert!(matches!(handle.send(NilCommand), Err(ActorError::Closed(name)) if name == "gone"));
        assert_eq!(handle.state().enqueued, 0);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (object, handle) = Object::new("twice", Options::default(), Nothing);
        let task = tokio::spawn(object.run());
        handle.close();
        handle.close();
        handle.closed().await;
        task.await.unwrap();
        assert!(handle.is_closed());
        assert_eq!(handle.state().done, 1);
    }
}
