//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. On first read, the computed runs its getter as an effect (so the
//!    getter's reads subscribe it) and caches the result.
//!
//! 2. When read again with no dependency change, it returns the cache.
//!
//! 3. When a dependency changes, the computed does not recompute. It is
//!    marked dirty and tells its own readers it is "maybe dirty".
//!
//! 4. A maybe-dirty reader asks its computeds to refresh before deciding
//!    whether to run. A computed that recomputes to a different value marks
//!    its readers dirty; one that recomputes to the same value leaves them
//!    to settle back to clean.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 computeds depend on it
//! - Only the computeds actually read will recompute
//! - A chain stops at the first computed whose value did not change

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::context;
use super::dep::{self, ComputedSource, Dep, DirtyLevel};
use super::effect::{EffectInner, EffectKind, EffectOptions};
use super::subscriber::TargetId;
use crate::error::{self, call_guarded, ErrorOrigin, ReactiveError};
use crate::observe::SameValue;

type Getter<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Setter<T> = Arc<dyn Fn(T) + Send + Sync>;

struct ComputedInner<T> {
    id: TargetId,
    getter: Getter<T>,
    setter: Option<Setter<T>>,
    value: RwLock<Option<T>>,
    dep: Arc<Dep>,
    effect: Arc<EffectInner>,
    cacheable: bool,
}

impl<T> ComputedInner<T>
where
    T: Clone + SameValue + Send + Sync + 'static,
{
    /// Bring the cache up to date and return it.
    fn evaluate(&self) -> T {
        let cached = self.value.read().clone();
        if let Some(value) = cached {
            if !self.effect.is_dirty() {
                return value;
            }
        }

        let getter = self.getter.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.effect.run_with(|| getter())));
        let value = match result {
            Ok(value) => value,
            Err(payload) => {
                // keep the stale cache from being served as fresh
                self.effect.raise_dirty_level(DirtyLevel::Dirty);
                panic::resume_unwind(payload);
            }
        };

        let changed = {
            let mut slot = self.value.write();
            let changed = slot.as_ref().map_or(true, |old| !old.same_value(&value));
            *slot = Some(value.clone());
            changed
        };
        if changed {
            dep::trigger_dep(&self.dep, DirtyLevel::Dirty, None);
        }
        value
    }
}

impl<T> ComputedSource for ComputedInner<T>
where
    T: Clone + SameValue + Send + Sync + 'static,
{
    fn refresh(&self) {
        self.evaluate();
    }

    fn propagate(&self) {
        dep::trigger_dep(&self.dep, DirtyLevel::MaybeDirty, None);
    }
}

/// A cached derived value.
///
/// # Example
///
/// ```rust
/// use weft_core::reactive::{Computed, Signal};
///
/// let count = Signal::new(2);
///
/// let count_clone = count.clone();
/// let doubled = Computed::new(move || count_clone.get() * 2);
/// assert_eq!(doubled.get(), 4);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Computed<T>
where
    T: Clone + SameValue + Send + Sync + 'static,
{
    /// Create a computed. The getter does not run until the first read.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Arc::new(getter), None, true)
    }

    /// Create a computed whose `set` calls `setter`.
    ///
    /// The setter is expected to write the state the getter reads; the
    /// cache is never written directly.
    pub fn with_setter<F, S>(getter: F, setter: S) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Self::build(Arc::new(getter), Some(Arc::new(setter)), true)
    }

    /// A computed that never caches: every read runs the getter, untracked.
    pub fn uncached<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Arc::new(getter), None, false)
    }

    fn build(getter: Getter<T>, setter: Option<Setter<T>>, cacheable: bool) -> Self {
        let id = TargetId::new();
        let inner = Arc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let source: Weak<dyn ComputedSource> = weak.clone();
            let run_getter = getter.clone();
            let effect = EffectInner::new(
                Arc::new(move || {
                    run_getter();
                }),
                EffectKind::Computed(source.clone()),
                &EffectOptions::default(),
            );
            ComputedInner {
                id,
                getter,
                setter,
                value: RwLock::new(None),
                dep: Arc::new(Dep::for_computed(id, source)),
                effect,
                cacheable,
            }
        });
        Self { inner }
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// The current value, recomputed if a dependency changed. Subscribes
    /// the running effect, if any.
    ///
    /// A panic in the getter propagates to the caller; see
    /// [`try_get`](Self::try_get).
    pub fn get(&self) -> T {
        let inner = &self.inner;
        if !inner.cacheable {
            return context::untracked(|| (inner.getter)());
        }
        if !inner.effect.is_active() {
            error::warn(ReactiveError::Disposed);
            return context::untracked(|| (inner.getter)());
        }

        let value = inner.evaluate();
        dep::track_owned(&inner.dep);
        value
    }

    /// Like [`get`](Self::get), but a panicking getter is reported and
    /// yields `None`.
    pub fn try_get(&self) -> Option<T> {
        call_guarded(ErrorOrigin::ComputedGetter, || self.get())
    }

    /// Call the setter. Without one, this is a misuse warning.
    pub fn set(&self, value: T) {
        match &self.inner.setter {
            Some(setter) => setter(value),
            None => error::warn(ReactiveError::ReadonlyWrite {
                key: "computed value".to_string(),
            }),
        }
    }

    pub fn is_writable(&self) -> bool {
        self.inner.setter.is_some()
    }

    /// Stop tracking. Later reads warn and evaluate untracked.
    pub fn stop(&self) {
        self.inner.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.inner.effect.is_active()
    }

    /// Dirty level of the cache, without resolving it.
    pub fn state(&self) -> DirtyLevel {
        self.inner.effect.dirty_level()
    }

    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Number of effects reading this computed.
    pub fn dependent_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }

    /// Number of deps the getter read last time it ran.
    pub fn dependency_count(&self) -> usize {
        self.inner.effect.dependency_count()
    }
}

impl<T> fmt::Debug for Computed<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .field("state", &self.inner.effect.dirty_level())
            .finish()
    }
}

/// Create a computed. See [`Computed::new`].
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + SameValue + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Computed::new(getter)
}

/// Create a computed with a setter. See [`Computed::with_setter`].
pub fn writable_computed<T, F, S>(getter: F, setter: S) -> Computed<T>
where
    T: Clone + SameValue + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
    S: Fn(T) + Send + Sync + 'static,
{
    Computed::with_setter(getter, setter)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{set_error_handler, take_error_handler};
    use crate::reactive::{Effect, Signal};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counted<T, F>(f: F) -> (Computed<T>, Arc<AtomicI32>)
    where
        T: Clone + SameValue + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let computed = Computed::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            f()
        });
        (computed, calls)
    }

    #[test]
    fn computed_is_lazy() {
        let (computed, calls) = counted(|| 42);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!computed.has_value());

        assert_eq!(computed.get(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn computed_caches_value() {
        let source = Signal::new(1);
        let reader = source.clone();
        let (computed, calls) = counted(move || reader.get() + 1);

        assert_eq!(computed.get(), 2);
        assert_eq!(computed.get(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn computed_recomputes_after_change() {
        let source = Signal::new(1);
        let reader = source.clone();
        let (computed, calls) = counted(move || reader.get() * 10);
        assert_eq!(computed.get(), 10);

        source.set(2);
        assert_eq!(computed.state(), DirtyLevel::Dirty);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(computed.get(), 20);
        assert_eq!(computed.get(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unchanged_upstream_computed_stops_the_chain() {
        let source = Signal::new(1);
        let reader = source.clone();
        let (parity, _) = counted(move || reader.get() % 2);

        let parity_reader = parity.clone();
        let (label, label_calls) = counted(move || {
            if parity_reader.get() == 0 {
                "even"
            } else {
                "odd"
            }
        });
        assert_eq!(label.get(), "odd");

        source.set(3);
        assert_eq!(label.get(), "odd");
        assert_eq!(label_calls.load(Ordering::SeqCst), 1);

        source.set(4);
        assert_eq!(label.get(), "even");
        assert_eq!(label_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn effect_reruns_only_when_computed_changes() {
        let source = Signal::new(1);
        let reader = source.clone();
        let positive = Computed::new(move || reader.get() > 0);

        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let positive_reader = positive.clone();
        let _effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            positive_reader.get();
        });
        assert_eq!(positive.dependent_count(), 1);

        source.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        source.set(-1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn writable_computed_routes_through_setter() {
        let source = Signal::new(1);
        let reader = source.clone();
        let writer = source.clone();
        let doubled = writable_computed(move || reader.get() * 2, move |v: i32| writer.set(v / 2));
        assert!(doubled.is_writable());

        doubled.set(10);
        assert_eq!(source.get(), 5);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn readonly_computed_set_warns() {
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        set_error_handler(move |error, _| sink.lock().push(error.clone()));

        let constant = computed(|| 1);
        constant.set(2);
        assert_eq!(constant.get(), 1);
        assert!(matches!(warnings.lock()[0], ReactiveError::ReadonlyWrite { .. }));
        take_error_handler();
    }

    #[test]
    fn uncached_always_recomputes_and_never_tracks() {
        let source = Signal::new(1);
        let reader = source.clone();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let uncached = Computed::uncached(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            reader.get()
        });

        uncached.get();
        uncached.get();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let uncached_reader = uncached.clone();
        let _effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            uncached_reader.get();
        });
        source.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stopped_computed_warns_and_evaluates_fresh() {
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        set_error_handler(move |error, _| sink.lock().push(error.clone()));

        let source = Signal::new(1);
        let reader = source.clone();
        let computed = Computed::new(move || reader.get());
        assert_eq!(computed.get(), 1);

        computed.stop();
        source.set(2);
        assert_eq!(computed.get(), 2);
        assert_eq!(*warnings.lock(), vec![ReactiveError::Disposed]);
        take_error_handler();
    }

    #[test]
    fn panicking_getter_is_reported_by_try_get() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        set_error_handler(move |error, _| sink.lock().push(error.clone()));

        let fail = Signal::new(true);
        let reader = fail.clone();
        let computed = Computed::new(move || {
            if reader.get() {
                panic!("bad input");
            }
            7
        });

        assert_eq!(computed.try_get(), None);
        assert!(matches!(
            errors.lock()[0],
            ReactiveError::Panicked {
                origin: ErrorOrigin::ComputedGetter,
                ..
            }
        ));

        fail.set(false);
        assert_eq!(computed.try_get(), Some(7));
        take_error_handler();
    }
}
