//! Effect Implementation
//!
//! An Effect is a re-runnable computation that re-runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately (unless lazy)
//!    to establish initial dependencies.
//!
//! 2. Each run first unlinks the effect from every dep it belonged to, then
//!    runs the function as the active effect so the reads it performs this
//!    time re-link it. Branches not taken this run leave no subscriptions.
//!
//! 3. When a dependency changes, the effect's dirty level is raised and its
//!    [`Schedule`] decides what happens: re-run right after the trigger,
//!    queue a pre- or post-flush job, or hand the effect to a custom
//!    scheduler.
//!
//! # Recursion
//!
//! An effect that writes to something it reads would trigger itself. Unless
//! created with `allow_recurse`, such a self-trigger only marks it dirty; it
//! is not scheduled while it is still running.
//!
//! # Lifetime
//!
//! Dependency sets only hold weak references to effects. An effect stays
//! alive as long as an [`Effect`] handle or the [`EffectScope`] it was
//! created in does; dropping the last one disposes it.
//!
//! [`EffectScope`]: super::EffectScope

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use smallvec::SmallVec;

use super::context::{self, ReactiveContext, TrackingPause};
use super::dep::{ComputedSource, Dep, DepKey, DirtyLevel, TrackOp, TriggerOp};
use super::scope;
use super::subscriber::{EffectId, TargetId};
use crate::config;
use crate::error::{call_guarded, ErrorOrigin};
use crate::observe::Value;
use crate::scheduler::{self, Job};

/// Callback receiving debugger events.
pub type DebugHook = Arc<dyn Fn(&DebuggerEvent) + Send + Sync>;

/// A user-supplied scheduler. Receives the triggered effect and decides
/// when (or whether) to run it.
pub type CustomScheduler = Arc<dyn Fn(&Effect) + Send + Sync>;

/// When a triggered effect runs.
#[derive(Clone, Default)]
pub enum Schedule {
    /// Re-run as soon as the triggering write has notified everyone.
    #[default]
    Sync,
    /// Queue a job that runs before post-flush work.
    Pre,
    /// Queue a job that runs after every pre-flush job.
    Post,
    /// Hand the effect to a custom scheduler.
    Custom(CustomScheduler),
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => f.write_str("Sync"),
            Self::Pre => f.write_str("Pre"),
            Self::Post => f.write_str("Post"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Options for creating an effect.
#[derive(Clone, Default)]
pub struct EffectOptions {
    pub(crate) lazy: bool,
    pub(crate) schedule: Schedule,
    pub(crate) allow_recurse: bool,
    pub(crate) on_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_track: Option<DebugHook>,
    pub(crate) on_trigger: Option<DebugHook>,
}

impl EffectOptions {
    /// Do not run on creation.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Shorthand for `schedule(Schedule::Custom(..))`.
    pub fn scheduler<F>(self, scheduler: F) -> Self
    where
        F: Fn(&Effect) + Send + Sync + 'static,
    {
        self.schedule(Schedule::Custom(Arc::new(scheduler)))
    }

    /// Let the effect be scheduled by writes it performs itself.
    pub fn allow_recurse(mut self, allow: bool) -> Self {
        self.allow_recurse = allow;
        self
    }

    pub fn on_stop<F>(mut self, on_stop: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(on_stop));
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
}

/// What a debugger hook observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DebugOp {
    Track(TrackOp),
    Trigger(TriggerOp),
}

/// Payload passed to `on_track` / `on_trigger`.
#[derive(Debug, Clone, Serialize)]
pub struct DebuggerEvent {
    pub effect: EffectId,
    pub target: TargetId,
    pub op: DebugOp,
    pub key: DepKey,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
}

impl DebuggerEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub(crate) enum EffectKind {
    Plain(Schedule),
    Computed(Weak<dyn ComputedSource>),
}

struct DirtyState {
    level: DirtyLevel,
    should_schedule: bool,
}

/// Shared state behind an [`Effect`] handle.
pub(crate) struct EffectInner {
    id: EffectId,
    run: Arc<dyn Fn() + Send + Sync>,
    kind: EffectKind,
    allow_recurse: bool,
    active: AtomicBool,
    running: AtomicUsize,
    run_count: AtomicUsize,
    state: Mutex<DirtyState>,
    deps: Mutex<SmallVec<[Weak<Dep>; 4]>>,
    on_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    on_track: Option<DebugHook>,
    on_trigger: Option<DebugHook>,
    job: Job,
    scope: OnceLock<scope::ScopeLink>,
}

impl EffectInner {
    pub(crate) fn new(
        run: Arc<dyn Fn() + Send + Sync>,
        kind: EffectKind,
        options: &EffectOptions,
    ) -> Arc<Self> {
        let id = EffectId::new();
        let is_pre = matches!(kind, EffectKind::Plain(Schedule::Pre));

        let inner = Arc::new_cyclic(|weak: &Weak<EffectInner>| {
            let job_target = weak.clone();
            let job = Job::new(move || {
                if let Some(effect) = job_target.upgrade() {
                    if effect.is_active() && effect.is_dirty() {
                        effect.run();
                    }
                }
            })
            .with_order(id.raw())
            .allow_recurse(options.allow_recurse);

            Self {
                id,
                run,
                kind,
                allow_recurse: options.allow_recurse,
                active: AtomicBool::new(true),
                running: AtomicUsize::new(0),
                run_count: AtomicUsize::new(0),
                state: Mutex::new(DirtyState {
                    level: DirtyLevel::Dirty,
                    should_schedule: false,
                }),
                deps: Mutex::new(SmallVec::new()),
                on_stop: options.on_stop.clone(),
                on_track: options.on_track.clone(),
                on_trigger: options.on_trigger.clone(),
                job: if is_pre { job.pre() } else { job },
                scope: OnceLock::new(),
            }
        });

        if let Some(link) = scope::record_effect(&inner) {
            let _ = inner.scope.set(link);
        }
        inner
    }

    pub(crate) fn id(&self) -> EffectId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn dirty_level(&self) -> DirtyLevel {
        self.state.lock().level
    }

    /// Resolve a `MaybeDirty` level by refreshing the computeds this effect
    /// reads, then report whether a re-run is needed.
    pub(crate) fn is_dirty(&self) -> bool {
        if self.dirty_level() == DirtyLevel::MaybeDirty {
            let _paused = TrackingPause::new();
            for dep in self.live_deps() {
                if let Some(computed) = dep.computed() {
                    computed.refresh();
                    if self.dirty_level() >= DirtyLevel::Dirty {
                        break;
                    }
                }
            }

            let mut state = self.state.lock();
            if state.level == DirtyLevel::MaybeDirty {
                state.level = DirtyLevel::Clean;
            }
        }
        self.dirty_level() >= DirtyLevel::Dirty
    }

    /// Run the effect body. A panic is reported with origin `Effect` and
    /// does not reach the caller.
    pub(crate) fn run(self: &Arc<Self>) {
        let run = self.run.clone();
        call_guarded(ErrorOrigin::Effect, || self.run_with(|| run()));
    }

    /// Run `f` as this effect: tracked, with stale dependencies pruned.
    ///
    /// A stopped effect still runs `f`, but without tracking.
    pub(crate) fn run_with<R>(self: &Arc<Self>, f: impl FnOnce() -> R) -> R {
        self.state.lock().level = DirtyLevel::Clean;
        if !self.is_active() {
            return context::untracked(f);
        }

        let _ctx = ReactiveContext::enter(self.clone());
        let _running = RunningGuard::enter(&self.running);
        self.cleanup_deps();
        self.run_count.fetch_add(1, Ordering::Relaxed);
        f()
    }

    pub(crate) fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.cleanup_deps();
            if let Some(scope) = self.scope.get() {
                scope.release(self.id);
            }
            if let Some(on_stop) = &self.on_stop {
                call_guarded(ErrorOrigin::StopCallback, || on_stop());
            }
            tracing::debug!(effect = ?self.id, "effect stopped");
        }
    }

    /// The job queued for `Pre` and `Post` schedules.
    pub(crate) fn job(&self) -> &Job {
        &self.job
    }

    pub(crate) fn link(&self, dep: &Arc<Dep>) {
        self.deps.lock().push(Arc::downgrade(dep));
    }

    fn cleanup_deps(&self) {
        let deps = std::mem::take(&mut *self.deps.lock());
        for dep in deps.iter().filter_map(Weak::upgrade) {
            dep.remove(self.id);
        }
    }

    fn live_deps(&self) -> Vec<Arc<Dep>> {
        self.deps.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.deps
            .lock()
            .iter()
            .filter(|dep| dep.strong_count() > 0)
            .count()
    }

    /// Raise the dirty level. Returns whether the effect has a pending
    /// notification (it just left `Clean`, or a previous one was held back
    /// because it was running).
    pub(crate) fn raise_dirty_level(&self, level: DirtyLevel) -> bool {
        let mut state = self.state.lock();
        if state.level < level {
            if state.level == DirtyLevel::Clean {
                state.should_schedule = true;
            }
            state.level = level;
        }
        state.should_schedule
    }

    /// Immediate reaction to becoming dirty. Computeds pass `MaybeDirty`
    /// on to their readers.
    pub(crate) fn notify(&self) {
        if let EffectKind::Computed(computed) = &self.kind {
            if let Some(computed) = computed.upgrade() {
                computed.propagate();
            }
        }
    }

    /// Consume the pending notification unless the effect is running and
    /// may not recurse. Returns whether a scheduler should be queued.
    pub(crate) fn may_schedule(&self) -> bool {
        if self.running.load(Ordering::SeqCst) > 0 && !self.allow_recurse {
            return false;
        }
        self.state.lock().should_schedule = false;
        matches!(self.kind, EffectKind::Plain(_))
    }

    pub(crate) fn dispatch_scheduler(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let EffectKind::Plain(schedule) = &self.kind else {
            return;
        };
        match schedule {
            Schedule::Sync => {
                call_guarded(ErrorOrigin::Effect, || {
                    if self.is_dirty() {
                        self.run();
                    }
                });
            }
            Schedule::Pre => scheduler::queue_job(self.job.clone()),
            Schedule::Post => scheduler::queue_post_flush_cb(self.job.clone()),
            Schedule::Custom(custom) => {
                let handle = Effect {
                    inner: self.clone(),
                };
                call_guarded(ErrorOrigin::Scheduler, || custom(&handle));
            }
        }
    }

    pub(crate) fn on_track(&self, event: impl FnOnce() -> DebuggerEvent) {
        if let Some(hook) = &self.on_track {
            emit(hook, event);
        }
    }

    pub(crate) fn on_trigger(&self, event: impl FnOnce() -> DebuggerEvent) {
        if let Some(hook) = &self.on_trigger {
            emit(hook, event);
        }
    }
}

fn emit(hook: &DebugHook, event: impl FnOnce() -> DebuggerEvent) {
    if !config::with_config(|c| c.dev_diagnostics) {
        return;
    }
    // Hooks observe; they must not subscribe to anything.
    let _paused = TrackingPause::new();
    hook(&event());
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        for dep in self.deps.get_mut().iter().filter_map(Weak::upgrade) {
            dep.remove(self.id);
        }
        if let Some(on_stop) = &self.on_stop {
            call_guarded(ErrorOrigin::StopCallback, || on_stop());
        }
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a reactive effect.
///
/// Clones share the same effect. The effect is disposed when the last
/// handle is dropped, unless an [`EffectScope`](super::EffectScope) owns it.
///
/// # Example
///
/// ```rust
/// use weft_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
///
/// let count_clone = count.clone();
/// let effect = Effect::new(move || {
///     println!("Count is: {}", count_clone.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// effect.stop();
/// ```
#[derive(Clone)]
#[must_use = "dropping the last handle disposes the effect"]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it immediately to establish dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(run, EffectOptions::default())
    }

    /// Create an effect without running it.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(run, EffectOptions::default().lazy())
    }

    pub fn with_options<F>(run: F, options: EffectOptions) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = EffectInner::new(
            Arc::new(run),
            EffectKind::Plain(options.schedule.clone()),
            &options,
        );
        let effect = Self { inner };
        if !options.lazy {
            effect.run();
        }
        effect
    }

    pub(crate) fn from_inner(inner: Arc<EffectInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<EffectInner> {
        &self.inner
    }

    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Run the effect now.
    pub fn run(&self) {
        self.inner.run();
    }

    /// Stop the effect: unsubscribe it everywhere and never track again.
    ///
    /// Idempotent, and safe to call from inside the effect itself.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Whether a dependency changed since the last run. Resolves a pending
    /// `MaybeDirty` state by checking upstream computeds.
    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    pub fn dirty_level(&self) -> DirtyLevel {
        self.inner.dirty_level()
    }

    /// Number of times the effect has run with tracking.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Number of dependency sets the effect currently belongs to.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependency_count()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Create an effect. See [`Effect::with_options`].
pub fn effect<F>(run: F, options: EffectOptions) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    Effect::with_options(run, options)
}

/// Stop an effect. See [`Effect::stop`].
pub fn stop(effect: &Effect) {
    effect.stop();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Effect should have run once on creation
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new_lazy(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 0);
        assert_eq!(effect.run_count(), 0);

        // Manually run
        effect.run();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let count = Signal::new(0);
        let seen = Arc::new(AtomicI32::new(-1));

        let count_clone = count.clone();
        let seen_clone = seen.clone();
        let effect = Effect::new(move || {
            seen_clone.store(count_clone.get(), Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        count.set(42);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn stopped_effect_does_not_rerun() {
        let count = Signal::new(0);
        let count_clone = count.clone();
        let effect = Effect::new(move || {
            count_clone.get();
        });

        effect.stop();
        assert!(!effect.is_active());
        assert_eq!(effect.dependency_count(), 0);

        count.set(1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn stopped_effect_still_runs_explicitly_without_tracking() {
        let count = Signal::new(0);
        let calls = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let calls_clone = calls.clone();
        let effect = Effect::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            count_clone.get();
        });
        effect.stop();

        effect.run();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(effect.dependency_count(), 0);
        assert_eq!(count.subscriber_count(), 0);
    }

    #[test]
    fn stop_is_idempotent_and_calls_on_stop_once() {
        let stops = Arc::new(AtomicI32::new(0));
        let stops_clone = stops.clone();
        let effect = Effect::with_options(
            || {},
            EffectOptions::default().on_stop(move || {
                stops_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        effect.stop();
        effect.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn self_triggering_effect_does_not_loop() {
        let count = Signal::new(0);
        let count_clone = count.clone();
        let effect = Effect::new(move || {
            let value = count_clone.get();
            count_clone.set(value + 1);
        });

        assert_eq!(count.get_untracked(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn allow_recurse_reruns_until_stable() {
        let count = Signal::new(0);
        let count_clone = count.clone();
        let effect = Effect::with_options(
            move || {
                let value = count_clone.get();
                if value < 3 {
                    count_clone.set(value + 1);
                }
            },
            EffectOptions::default().allow_recurse(true),
        );

        assert_eq!(count.get_untracked(), 3);
        assert_eq!(effect.run_count(), 4);
    }

    #[test]
    fn custom_scheduler_receives_effect() {
        let count = Signal::new(0);
        let scheduled = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let scheduled_clone = scheduled.clone();
        let effect = Effect::with_options(
            move || {
                count_clone.get();
            },
            EffectOptions::default().scheduler(move |_effect| {
                scheduled_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        count.set(1);
        count.set(2);
        // The effect never re-ran, so it stays dirty and is not re-notified.
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);

        effect.run();
        count.set(3);
        assert_eq!(scheduled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_effects_restore_outer_tracking() {
        let outer_source = Signal::new(0);
        let inner_source = Signal::new(0);
        let outer_runs = Arc::new(AtomicI32::new(0));
        let inner_handle: Arc<Mutex<Option<Effect>>> = Arc::new(Mutex::new(None));

        let outer_clone = outer_source.clone();
        let inner_clone = inner_source.clone();
        let outer_runs_clone = outer_runs.clone();
        let inner_slot = inner_handle.clone();
        let _outer = Effect::new(move || {
            outer_runs_clone.fetch_add(1, Ordering::SeqCst);
            let inner_source = inner_clone.clone();
            *inner_slot.lock() = Some(Effect::new(move || {
                inner_source.get();
            }));
            // Read after the nested effect: must be tracked by the outer one.
            outer_clone.get();
        });

        inner_source.set(1);
        assert_eq!(outer_runs.load(Ordering::SeqCst), 1);

        outer_source.set(1);
        assert_eq!(outer_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn debugger_hooks_receive_events() {
        let count = Signal::new(0);
        let tracked = Arc::new(Mutex::new(Vec::new()));
        let triggered = Arc::new(Mutex::new(Vec::new()));

        let count_clone = count.clone();
        let tracked_clone = tracked.clone();
        let triggered_clone = triggered.clone();
        let _effect = Effect::with_options(
            move || {
                count_clone.get();
            },
            EffectOptions::default()
                .on_track(move |event| tracked_clone.lock().push(event.op))
                .on_trigger(move |event| triggered_clone.lock().push(event.op)),
        );

        count.set(1);
        assert_eq!(*tracked.lock(), vec![DebugOp::Track(TrackOp::Get); 2]);
        assert_eq!(*triggered.lock(), vec![DebugOp::Trigger(TriggerOp::Set)]);
    }

    #[test]
    fn debugger_event_serializes() {
        let event = DebuggerEvent {
            effect: EffectId::new(),
            target: TargetId::new(),
            op: DebugOp::Trigger(TriggerOp::Add),
            key: DepKey::from("count"),
            new_value: Some(Value::from(2)),
            old_value: None,
        };
        let json = event.to_json().unwrap();
        assert!(json.contains(r#""op":{"Trigger":"Add"}"#));
        assert!(json.contains(r#""key":{"Field":"count"}"#));
        assert!(json.contains(r#""new_value":2.0"#));
    }

    #[test]
    fn dropping_last_handle_disposes_effect() {
        let count = Signal::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            count_clone.get();
        });
        drop(effect);

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(count.subscriber_count(), 0);
    }
    #[test]
    fn panicking_first_run_is_reported_not_unwound() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        crate::error::set_error_handler(move |error, _| sink.lock().push(error.clone()));

        let result = std::panic::catch_unwind(|| {
            let _effect = Effect::new(|| panic!("body failed"));
        });

        assert!(result.is_ok());
        assert!(matches!(
            errors.lock().as_slice(),
            [crate::error::ReactiveError::Panicked {
                origin: ErrorOrigin::Effect,
                ..
            }]
        ));
        crate::error::take_error_handler();
    }

    #[test]
    fn panicking_explicit_run_is_reported_and_effect_keeps_tracking() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        crate::error::set_error_handler(move |error, _| sink.lock().push(error.clone()));

        let count = Signal::new(0);
        let runs = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            if count_clone.get() == 1 {
                panic!("body failed");
            }
        });

        count.set(1);
        assert_eq!(errors.lock().len(), 1);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| effect.run()));
        assert!(result.is_ok());
        assert_eq!(errors.lock().len(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        // The dependency read before the panic is still tracked.
        count.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(errors.lock().len(), 2);
        crate::error::take_error_handler();
    }
}
