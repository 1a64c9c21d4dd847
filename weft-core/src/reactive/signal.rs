//! Signal Implementation
//!
//! A Signal is the single-value reactive primitive. It holds a value and
//! owns the one dependency set of everything that reads it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read by a running effect, the effect subscribes to
//!    the signal's dep.
//!
//! 2. When a signal is set to a value that differs by [`SameValue`], every
//!    subscriber is marked dirty and scheduled.
//!
//! A plain signal is shallow: setting it is the only change it sees. Use
//! [`deep_signal`] to hold a composite whose contents are observed too.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::dep::{self, Dep, DepKey, DirtyLevel};
use super::subscriber::TargetId;
use crate::observe::{self, SameValue, Value};

struct SignalInner<T> {
    id: TargetId,
    value: RwLock<T>,
    dep: Arc<Dep>,
    transform: Option<fn(T) -> T>,
}

/// A reactive cell holding a value of type `T`.
///
/// Clones share the same cell.
///
/// # Example
///
/// ```rust
/// use weft_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Signal<T>
where
    T: Clone + SameValue + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        Self::build(value, None)
    }

    fn build(value: T, transform: Option<fn(T) -> T>) -> Self {
        let id = TargetId::new();
        let value = match transform {
            Some(transform) => transform(value),
            None => value,
        };
        Self {
            inner: Arc::new(SignalInner {
                id,
                value: RwLock::new(value),
                dep: Arc::new(Dep::new(id, DepKey::Value)),
                transform,
            }),
        }
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// The current value. Subscribes the running effect, if any.
    pub fn get(&self) -> T {
        dep::track_owned(&self.inner.dep);
        self.inner.value.read().clone()
    }

    /// Borrow the current value. Subscribes the running effect, if any.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        dep::track_owned(&self.inner.dep);
        f(&self.inner.value.read())
    }

    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Replace the value. Subscribers run only if it changed.
    pub fn set(&self, value: T) {
        let value = match self.inner.transform {
            Some(transform) => transform(value),
            None => value,
        };
        let changed = {
            let mut slot = self.inner.value.write();
            if slot.same_value(&value) {
                false
            } else {
                *slot = value;
                true
            }
        };
        if changed {
            self.notify();
        }
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.read());
        self.set(next);
    }

    /// Number of effects subscribed to this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }

    fn notify(&self) {
        tracing::trace!(signal = ?self.inner.id, "signal changed");
        dep::trigger_dep(&self.inner.dep, DirtyLevel::Dirty, None);
    }
}

impl<T> fmt::Debug for Signal<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .field("subscriber_count", &self.inner.dep.subscriber_count())
            .finish()
    }
}

/// A signal whose composite values are stored behind a reactive handle, so
/// reads of their contents are tracked too.
pub fn deep_signal(value: impl Into<Value>) -> Signal<Value> {
    Signal::build(value.into(), Some(|value: Value| observe::to_reactive(value)))
}

/// Run a signal's subscribers without changing its value.
///
/// Useful after mutating the inside of a shallow signal's value.
pub fn trigger_signal<T>(signal: &Signal<T>)
where
    T: Clone + SameValue + Send + Sync + 'static,
{
    signal.notify();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{ReactiveRecord, Target};
    use crate::reactive::Effect;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting<F>(f: F) -> (Effect, Arc<AtomicI32>)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            f();
        });
        (effect, runs)
    }

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_notifies_subscribers() {
        let signal = Signal::new(0);
        let reader = signal.clone();
        let (_effect, runs) = counting(move || {
            reader.get();
        });
        assert_eq!(signal.subscriber_count(), 1);

        signal.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        signal.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unchanged_value_does_not_notify() {
        let signal = Signal::new(f64::NAN);
        let reader = signal.clone();
        let (_effect, runs) = counting(move || {
            reader.get();
        });

        signal.set(f64::NAN);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        signal.set(0.0);
        signal.set(-0.0);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn untracked_read_does_not_subscribe() {
        let signal = Signal::new(0);
        let reader = signal.clone();
        let (_effect, runs) = counting(move || {
            reader.get_untracked();
        });

        signal.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);

        signal2.set(100);
        assert_eq!(signal1.get(), 100);
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn trigger_signal_forces_rerun() {
        let signal = Signal::new(vec![1]);
        let reader = signal.clone();
        let (_effect, runs) = counting(move || {
            reader.with(|items| items.len());
        });

        trigger_signal(&signal);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn deep_signal_observes_contents() {
        let signal = deep_signal(Target::record_from([("n", 1)]));
        let record = ReactiveRecord::try_from(signal.get_untracked()).unwrap();

        let reader = signal.clone();
        let (_effect, runs) = counting(move || {
            if let Ok(record) = ReactiveRecord::try_from(reader.get()) {
                record.get("n");
            }
        });

        record.set("n", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        signal.set(Value::from(3));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
