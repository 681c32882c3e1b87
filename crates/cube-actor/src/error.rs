//! # Actor Errors
//!
//! Error types shared by objects, the module manager and hooks, plus the
//! [`guard`] boundary that keeps a failing or panicking callback from taking
//! the owning task down with it.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Boxed error type returned by commands, modules and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the actor runtime.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Object closed: {0}")]
    Closed(String),
    #[error("Callback failed: {0}")]
    Failed(BoxError),
    #[error("Callback panicked: {0}")]
    Panicked(String),
}

/// Runs `f`, converting both a returned error and a panic into a logged
/// fault. Returns `None` when `f` did not complete successfully.
///
/// `scope` names the kind of callback (e.g. `"command"`, `"module.update"`)
/// and `name` identifies its owner in the log line.
pub fn guard<T, F>(scope: &str, name: impl fmt::Display, f: F) -> Option<T>
where
    F: FnOnce() -> Result<T, BoxError>,
{
    match catch(f) {
        Ok(value) => Some(value),
        Err(err) => {
            error!(scope, name = %name, error = %err, "Fault recovered");
            None
        }
    }
}

/// Same as [`guard`] but hands the fault back instead of logging it.
pub fn catch<T, F>(f: F) -> Result<T, ActorError>
where
    F: FnOnce() -> Result<T, BoxError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ActorError::Failed(err)),
        Err(payload) => Err(ActorError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_reports_errors_and_panics() {
        let ok: Result<u8, ActorError> = catch(|| Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let failed = catch::<(), _>(|| Err("boom".into()));
        assert!(matches!(failed, Err(ActorError::Failed(e)) if e.to_string() == "boom"));

        let panicked = catch::<(), _>(|| panic!("kaboom {}", 1));
        assert!(matches!(panicked, Err(ActorError::Panicked(m)) if m == "kaboom 1"));
    }

    #[test]
    fn guard_swallows_faults() {
        assert_eq!(guard("test", "unit", || Ok(1)), Some(1));
        assert_eq!(guard::<u8, _>("test", "unit", || panic!("x")), None);
    }
}
