//! Error reporting.
//!
//! Nothing in the reactive engine re-throws into caller code on its own.
//! Failures inside user functions (effect bodies, computed getters, watch
//! callbacks, cleanups, queued jobs) and misuse (writing through a readonly
//! handle, reading a disposed computed) are funneled through one reporting
//! hook per thread. The default hook forwards to `tracing`.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config;

/// The call boundary at which a failure was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorOrigin {
    /// The body of an effect re-run by a trigger.
    Effect,
    /// A computed getter.
    ComputedGetter,
    /// The source getter of a watcher.
    WatchGetter,
    /// The callback of a watcher.
    WatchCallback,
    /// A cleanup registered through `OnCleanup`.
    Cleanup,
    /// A job drained from the scheduler queue.
    SchedulerJob,
    /// A custom effect scheduler.
    Scheduler,
    /// A callback registered with `on_scope_dispose`.
    ScopeDispose,
    /// An effect's `on_stop` callback.
    StopCallback,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Effect => "effect",
            Self::ComputedGetter => "computed getter",
            Self::WatchGetter => "watcher getter",
            Self::WatchCallback => "watcher callback",
            Self::Cleanup => "cleanup function",
            Self::SchedulerJob => "scheduler job",
            Self::Scheduler => "effect scheduler",
            Self::ScopeDispose => "scope dispose callback",
            Self::StopCallback => "effect stop callback",
        };
        f.write_str(name)
    }
}

/// Everything the reactive engine can report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    #[error("{origin} panicked: {message}")]
    Panicked { origin: ErrorOrigin, message: String },

    #[error("set operation on key `{key}` failed: target is readonly")]
    ReadonlyWrite { key: String },

    #[error("computed value was read after its effect had been stopped")]
    Disposed,

    #[error("cannot run an inactive effect scope")]
    InactiveScope,

    #[error("on_scope_dispose() called when there is no active effect scope")]
    NoActiveScope,

    #[error("maximum recursive updates exceeded ({limit}): a job keeps re-queuing itself")]
    RecursionLimit { limit: usize },

    #[error("expected a {expected} target, found {found}")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("value cannot be made reactive: {0}")]
    NotObservable(String),
}

/// How serious a report is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Severity {
    /// Recoverable misuse. The operation was skipped.
    Warning,
    /// A user function failed. Other work continues.
    Error,
}

/// The reporting hook signature.
pub type ErrorHandler = Arc<dyn Fn(&ReactiveError, Severity) + Send + Sync>;

thread_local! {
    static HANDLER: RefCell<Option<ErrorHandler>> = const { RefCell::new(None) };
}

/// Install the reporting hook for the current thread, replacing any
/// previous one.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&ReactiveError, Severity) + Send + Sync + 'static,
{
    HANDLER.with(|slot| *slot.borrow_mut() = Some(Arc::new(handler)));
}

/// Remove the current thread's hook, restoring the `tracing` default.
pub fn take_error_handler() -> Option<ErrorHandler> {
    HANDLER.with(|slot| slot.borrow_mut().take())
}

/// Report a failed user function.
pub fn report(error: ReactiveError) {
    dispatch(error, Severity::Error);
}

/// Report recoverable misuse.
pub fn warn(error: ReactiveError) {
    if matches!(error, ReactiveError::ReadonlyWrite { .. })
        && !config::with_config(|c| c.warn_on_readonly_write)
    {
        return;
    }
    dispatch(error, Severity::Warning);
}

fn dispatch(error: ReactiveError, severity: Severity) {
    // Clone the hook out so it can itself install a new one.
    let handler = HANDLER.with(|slot| slot.borrow().clone());
    match handler {
        Some(handler) => handler(&error, severity),
        None => match severity {
            Severity::Warning => tracing::warn!(%error, "reactivity warning"),
            Severity::Error => tracing::error!(%error, "unhandled error in reactive code"),
        },
    }
}

/// Run a user function, converting a panic into a report.
///
/// Returns `None` when the function panicked.
pub(crate) fn call_guarded<R>(origin: ErrorOrigin, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            report(ReactiveError::Panicked {
                origin,
                message: panic_message(payload.as_ref()),
            });
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
