//! Watchers
//!
//! A watcher binds a source to a callback: whenever what the source reads
//! changes, the callback receives the new and previous value.
//!
//! # How Watchers Work
//!
//! 1. The source is evaluated inside a lazy effect, so its reads subscribe
//!    the watcher. With `deep`, the result is traversed to subscribe to
//!    every nested field too.
//!
//! 2. When triggered, the effect's scheduler runs the watcher job right away
//!    (`Flush::Sync`) or queues it before (`Flush::Pre`) or after
//!    (`Flush::Post`) other work.
//!
//! 3. The job re-evaluates the source and calls back only if the value
//!    changed, the watcher is deep, or the source is a reactive handle
//!    (whose identity never changes when its contents do).
//!
//! Cleanups registered through [`OnCleanup`] run before the next callback
//! and when the watcher stops.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{self, call_guarded, ErrorOrigin, ReactiveError};
use crate::observe::{self, Proxy, ReactiveList, ReactiveMap, ReactiveRecord, ReactiveSet};
use crate::observe::{SameValue, Target, Value};
use crate::reactive::{
    Computed, DebugHook, DebuggerEvent, Effect, EffectOptions, Schedule, Signal,
};
use crate::scheduler::{self, Job};

type Getter = Arc<dyn Fn() -> Value + Send + Sync>;
type Callback = Arc<dyn Fn(&Value, Option<&Value>, &OnCleanup) + Send + Sync>;

/// When a triggered watcher runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flush {
    /// Queue a pre job, ordered by creation.
    #[default]
    Pre,
    /// Queue a post-flush callback.
    Post,
    /// Run inside the triggering write.
    Sync,
}

/// Options for [`watch`].
#[derive(Clone, Default)]
pub struct WatchOptions {
    pub(crate) immediate: bool,
    pub(crate) deep: bool,
    pub(crate) flush: Flush,
    pub(crate) once: bool,
    pub(crate) on_track: Option<DebugHook>,
    pub(crate) on_trigger: Option<DebugHook>,
}

impl WatchOptions {
    /// Call back once right away, with no previous value.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Subscribe to every nested field of the source's value.
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn flush(mut self, flush: Flush) -> Self {
        self.flush = flush;
        self
    }

    /// Stop after the first callback.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn on_track<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DebuggerEvent) + Send + Sync + 'static,
    {
        self.on_track = Some(Arc::new(hook));
        self
    }

    pub fn on_trigger<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DebuggerEvent) + Send + Sync + 'static,
    {
        self.on_trigger = Some(Arc::new(hook));
        self
    }

    fn effect_options(&self) -> EffectOptions {
        EffectOptions {
            on_track: self.on_track.clone(),
            on_trigger: self.on_trigger.clone(),
            ..EffectOptions::default()
        }
    }
}

impl fmt::Debug for WatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchOptions")
            .field("immediate", &self.immediate)
            .field("deep", &self.deep)
            .field("flush", &self.flush)
            .field("once", &self.once)
            .finish()
    }
}

/// Registers cleanups for the current watcher run.
#[derive(Clone, Default)]
pub struct OnCleanup {
    cleanups: Arc<Mutex<Vec<Box<dyn FnOnce() + Send>>>>,
}

impl OnCleanup {
    /// Run `f` before the next callback, or when the watcher stops.
    pub fn register<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanups.lock().push(Box::new(f));
    }

    fn run(&self) {
        let pending = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in pending {
            call_guarded(ErrorOrigin::Cleanup, cleanup);
        }
    }
}

impl fmt::Debug for OnCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnCleanup")
            .field("pending", &self.cleanups.lock().len())
            .finish()
    }
}

/// What a watcher observes.
#[derive(Clone)]
pub enum WatchSource {
    /// A reactive handle, watched deeply.
    Reactive(Proxy),
    /// Any function; its tracked reads are the dependencies.
    Getter(Getter),
    /// Several sources; the callback receives a list of their values.
    Many(Vec<WatchSource>),
}

impl WatchSource {
    pub fn getter<F, T>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Into<Value>,
    {
        Self::Getter(Arc::new(move || f().into()))
    }

    fn is_forced(&self) -> bool {
        match self {
            Self::Reactive(_) => true,
            Self::Getter(_) => false,
            Self::Many(sources) => sources.iter().any(|source| matches!(source, Self::Reactive(_))),
        }
    }

    fn read(&self) -> Value {
        match self {
            Self::Reactive(proxy) => {
                let value = Value::Reactive(proxy.clone());
                observe::traverse(&value, &mut HashSet::new());
                value
            }
            Self::Getter(getter) => {
                call_guarded(ErrorOrigin::WatchGetter, || getter()).unwrap_or(Value::Null)
            }
            Self::Many(sources) => {
                Value::Object(Target::list_from(sources.iter().map(WatchSource::read)))
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        match self {
            Self::Many(sources) => Snapshot::Many(sources.iter().map(WatchSource::read).collect()),
            source => Snapshot::One(source.read()),
        }
    }
}

impl fmt::Debug for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reactive(proxy) => f.debug_tuple("Reactive").field(proxy).finish(),
            Self::Getter(_) => f.write_str("Getter"),
            Self::Many(sources) => f.debug_tuple("Many").field(sources).finish(),
        }
    }
}

impl From<Proxy> for WatchSource {
    fn from(proxy: Proxy) -> Self {
        Self::Reactive(proxy)
    }
}

impl From<Value> for WatchSource {
    fn from(value: Value) -> Self {
        match value {
            Value::Reactive(proxy) => Self::Reactive(proxy),
            other => {
                error::warn(ReactiveError::NotObservable(other.type_name().to_string()));
                Self::Getter(Arc::new(move || other.clone()))
            }
        }
    }
}

impl From<Vec<WatchSource>> for WatchSource {
    fn from(sources: Vec<WatchSource>) -> Self {
        Self::Many(sources)
    }
}

impl<T> From<&Signal<T>> for WatchSource
where
    T: Clone + SameValue + Into<Value> + Send + Sync + 'static,
{
    fn from(signal: &Signal<T>) -> Self {
        let signal = signal.clone();
        Self::Getter(Arc::new(move || signal.get().into()))
    }
}

impl<T> From<&Computed<T>> for WatchSource
where
    T: Clone + SameValue + Into<Value> + Send + Sync + 'static,
{
    fn from(computed: &Computed<T>) -> Self {
        let computed = computed.clone();
        Self::Getter(Arc::new(move || computed.get().into()))
    }
}

macro_rules! view_source {
    ($($view:ident),*) => {
        $(
            impl From<$view> for WatchSource {
                fn from(view: $view) -> Self {
                    Self::Reactive(view.proxy().clone())
                }
            }

            impl From<&$view> for WatchSource {
                fn from(view: &$view) -> Self {
                    Self::Reactive(view.proxy().clone())
                }
            }
        )*
    };
}

view_source!(ReactiveRecord, ReactiveList, ReactiveMap, ReactiveSet);

enum Snapshot {
    One(Value),
    Many(Vec<Value>),
}

impl Snapshot {
    fn changed_from(&self, old: &Snapshot) -> bool {
        match (self, old) {
            (Self::One(new), Self::One(old)) => !new.same_value(old),
            (Self::Many(new), Self::Many(old)) => {
                new.len() != old.len()
                    || new.iter().zip(old).any(|(new, old)| !new.same_value(old))
            }
            _ => true,
        }
    }

    fn traverse(&self) {
        let mut seen = HashSet::new();
        match self {
            Self::One(value) => observe::traverse(value, &mut seen),
            Self::Many(values) => {
                for value in values {
                    observe::traverse(value, &mut seen);
                }
            }
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::One(value) => value.clone(),
            Self::Many(values) => Value::Object(Target::list_from(values.iter().cloned())),
        }
    }
}

struct WatchState {
    source: WatchSource,
    callback: Callback,
    deep: bool,
    forced: bool,
    once: bool,
    old: Mutex<Option<Snapshot>>,
    cleanup: OnCleanup,
}

impl WatchState {
    fn read(&self) -> Snapshot {
        let snapshot = self.source.snapshot();
        if self.deep {
            snapshot.traverse();
        }
        snapshot
    }

    fn fire(&self, effect: &Effect) {
        let inner = effect.inner();
        if !inner.is_active() || !inner.is_dirty() {
            return;
        }

        let new = inner.run_with(|| self.read());
        let old = self.old.lock().take();
        let changed = old.as_ref().map_or(true, |old| new.changed_from(old));
        if !(self.deep || self.forced || changed) {
            *self.old.lock() = old;
            return;
        }

        self.cleanup.run();
        let new_value = new.to_value();
        let old_value = old.as_ref().map(Snapshot::to_value);
        *self.old.lock() = Some(new);

        call_guarded(ErrorOrigin::WatchCallback, || {
            (self.callback)(&new_value, old_value.as_ref(), &self.cleanup)
        });

        if self.once {
            effect.stop();
        }
    }
}

fn dispatch(flush: Flush, job: &Job) {
    match flush {
        Flush::Sync => job.run(),
        Flush::Pre => scheduler::queue_job(job.clone()),
        Flush::Post => scheduler::queue_post_flush_cb(job.clone()),
    }
}

/// Handle to a running watcher.
///
/// Dropping the last handle stops the watcher, unless a scope owns it.
#[derive(Clone)]
#[must_use = "dropping the last handle stops the watcher"]
pub struct WatchHandle {
    effect: Effect,
}

impl WatchHandle {
    /// Stop watching. Idempotent; safe to call from the callback itself.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    /// The effect driving this watcher.
    pub fn effect(&self) -> &Effect {
        &self.effect
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("effect", &self.effect)
            .finish()
    }
}

/// Watch `source` and call `callback` with the new and previous value when
/// it changes.
///
/// # Example
///
/// ```rust
/// use parking_lot::Mutex;
/// use std::sync::Arc;
/// use weft_core::reactive::Signal;
/// use weft_core::scheduler::flush_jobs;
/// use weft_core::watch::{watch, WatchOptions};
///
/// let count = Signal::new(0);
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let sink = seen.clone();
/// let _handle = watch(
///     &count,
///     move |new, old, _| sink.lock().push((new.as_number(), old.and_then(|v| v.as_number()))),
///     WatchOptions::default(),
/// );
///
/// count.set(1);
/// count.set(2);
/// flush_jobs();
/// assert_eq!(*seen.lock(), vec![(Some(2.0), Some(0.0))]);
/// ```
pub fn watch<S, F>(source: S, callback: F, options: WatchOptions) -> WatchHandle
where
    S: Into<WatchSource>,
    F: Fn(&Value, Option<&Value>, &OnCleanup) + Send + Sync + 'static,
{
    let source = source.into();
    let state = Arc::new(WatchState {
        forced: source.is_forced(),
        source,
        callback: Arc::new(callback),
        deep: options.deep,
        once: options.once,
        old: Mutex::new(None),
        cleanup: OnCleanup::default(),
    });

    let job_slot: Arc<OnceLock<Job>> = Arc::new(OnceLock::new());
    let flush = options.flush;
    let scheduler = {
        let job_slot = job_slot.clone();
        move |_: &Effect| {
            if let Some(job) = job_slot.get() {
                dispatch(flush, job);
            }
        }
    };

    let reader = state.clone();
    let cleanup = state.cleanup.clone();
    let effect = Effect::with_options(
        move || {
            reader.read();
        },
        options
            .effect_options()
            .lazy()
            .scheduler(scheduler)
            .on_stop(move || cleanup.run()),
    );

    let job = {
        let target = Arc::downgrade(effect.inner());
        let state = state.clone();
        Job::new(move || {
            if let Some(inner) = target.upgrade() {
                state.fire(&Effect::from_inner(inner));
            }
        })
        .with_order(effect.id().raw())
        .allow_recurse(true)
    };
    let job = if flush == Flush::Pre { job.pre() } else { job };
    // fresh cell, cannot already be set
    let _ = job_slot.set(job.clone());

    if options.immediate {
        job.run();
    } else {
        let initial = effect.inner().run_with(|| state.read());
        *state.old.lock() = Some(initial);
    }

    WatchHandle { effect }
}

fn watch_effect_with<F>(f: F, flush: Flush) -> WatchHandle
where
    F: Fn(&OnCleanup) + Send + Sync + 'static,
{
    let cleanup = OnCleanup::default();
    let run_cleanup = cleanup.clone();
    let schedule = match flush {
        Flush::Pre => Schedule::Pre,
        Flush::Post => Schedule::Post,
        Flush::Sync => Schedule::Sync,
    };

    let effect = Effect::with_options(
        move || {
            run_cleanup.run();
            call_guarded(ErrorOrigin::WatchCallback, || f(&run_cleanup));
        },
        EffectOptions::default()
            .lazy()
            .schedule(schedule)
            .on_stop(move || cleanup.run()),
    );

    match flush {
        Flush::Post => scheduler::queue_post_flush_cb(effect.inner().job().clone()),
        Flush::Pre | Flush::Sync => effect.run(),
    }
    WatchHandle { effect }
}

/// Run `f` now and again (as a pre job) whenever what it read changes.
pub fn watch_effect<F>(f: F) -> WatchHandle
where
    F: Fn(&OnCleanup) + Send + Sync + 'static,
{
    watch_effect_with(f, Flush::Pre)
}

/// Like [`watch_effect`], but every run, including the first, is a
/// post-flush callback.
pub fn watch_post_effect<F>(f: F) -> WatchHandle
where
    F: Fn(&OnCleanup) + Send + Sync + 'static,
{
    watch_effect_with(f, Flush::Post)
}

/// Like [`watch_effect`], but re-runs inside the triggering write.
pub fn watch_sync_effect<F>(f: F) -> WatchHandle
where
    F: Fn(&OnCleanup) + Send + Sync + 'static,
{
    watch_effect_with(f, Flush::Sync)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
