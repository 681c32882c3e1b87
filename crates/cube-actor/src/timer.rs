//! Delayed and periodic commands.
//!
//! A [`Timers`] set schedules closures that run as commands on a target
//! object once their delay elapses. The wait happens on a tokio task; the
//! callback itself always executes on the object's task, so it gets the
//! same exclusive access to the state as any other command.

use crate::error::BoxError;
use crate::object::Handle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Default)]
struct Inner {
    next: AtomicU64,
    tasks: Mutex<HashMap<TimerId, JoinHandle<()>>>,
}

/// A cloneable set of pending timers.
#[derive(Clone, Default)]
pub struct Timers {
    inner: Arc<Inner>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on `object` once `delay` has elapsed.
    pub fn after<S, F>(&self, object: &Handle<S>, delay: Duration, f: F) -> TimerId
    where
        S: Send + 'static,
        F: FnOnce(&mut S, &Handle<S>) -> Result<(), BoxError> + Send + 'static,
    {
        let object = object.clone();
        let inner = Arc::clone(&self.inner);
        self.spawn(move |id| async move {
            time::sleep(delay).await;
            inner.tasks.lock().remove(&id);
            if let Err(err) = object.send_fn(f) {
                warn!(timer = id.0, error = %err, "Timer target gone");
            }
        })
    }

    /// Runs `f` on `object` every `period`, starting one period from now,
    /// until the timer is stopped or the object goes away.
    pub fn every<S, F>(&self, object: &Handle<S>, period: Duration, f: F) -> TimerId
    where
        S: Send + 'static,
        F: Fn(&mut S, &Handle<S>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let object = object.clone();
        let inner = Arc::clone(&self.inner);
        let f = Arc::new(f);
        self.spawn(move |id| async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let f = Arc::clone(&f);
                if object.send_fn(move |state, object| (*f)(state, object)).is_err() {
                    break;
                }
            }
            inner.tasks.lock().remove(&id);
        })
    }

    /// Cancels a pending timer. Returns `false` if it already fired or was
    /// stopped before.
    pub fn stop(&self, id: TimerId) -> bool {
        match self.inner.tasks.lock().remove(&id) {
            Some(task) => {
                task.abort();
                trace!(timer = id.0, "Timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let tasks: Vec<_> = self.inner.tasks.lock().drain().collect();
        trace!(count = tasks.len(), "Stopping all timers");
        for (_, task) in tasks {
            task.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn<Fut>(&self, make: impl FnOnce(TimerId) -> Fut) -> TimerId
    where
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = TimerId(self.inner.next.fetch_add(1, Ordering::Relaxed));
        // Held across spawn: the task's own removal must follow the insert.
        let mut tasks = self.inner.tasks.lock();
        tasks.insert(id, tokio::spawn(make(id)));
        id
    }
}
