//! Dependency Store
//!
//! The store connects observables to the effects that read them. It is a
//! two-level index, `target -> key -> Dep`, where a [`Dep`] is the set of
//! effects subscribed to one `(target, key)` pair.
//!
//! # How It Works
//!
//! 1. When an effect reads an observable, [`track`] fetches (or creates) the
//!    `Dep` for the pair and links it with the active effect in both
//!    directions.
//!
//! 2. When an observable is written, [`trigger`] collects the `Dep`s affected
//!    by the write (the key itself plus synthetic keys for structural changes)
//!    and raises the dirty level of every subscribed effect.
//!
//! 3. Effects going from clean to dirty are notified. Computeds propagate
//!    `MaybeDirty` to their own readers; other effects have their scheduler
//!    queued and run once the whole trigger pass is over.
//!
//! # Ownership
//!
//! Neither direction of a link owns the other side: a `Dep` holds `Weak`
//! references to its effects and effects hold `Weak` references to their
//! `Dep`s. The store owns target `Dep`s. It drops one when its last
//! subscriber leaves, and all of a target's when the target goes away.
//! Signals and computeds own their single `Dep` directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::context::{ReactiveContext, SchedulingPause};
use super::effect::{DebugOp, DebuggerEvent, EffectInner};
use super::subscriber::{EffectId, TargetId};
use crate::observe::{TargetKind, Value};

/// Dirty state of an effect.
///
/// Ordered so that raising a level is a plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DirtyLevel {
    /// The last run is up to date.
    Clean,

    /// A computed this effect reads might have changed. Need to check.
    MaybeDirty,

    /// A dependency definitely changed.
    Dirty,
}

/// The second level of the store index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DepKey {
    /// A named record field.
    Field(Arc<str>),
    /// A list element.
    Index(usize),
    /// The length of a list.
    Length,
    /// Any structural change: iteration order, membership or size.
    Iterate,
    /// The key set of a map. Value-only updates do not touch it.
    MapKeyIterate,
    /// One entry of a map or set, identified by its raw key.
    Entry(Value),
    /// The value of a signal or computed.
    Value,
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
            Self::Length => f.write_str("length"),
            Self::Iterate => f.write_str("<iterate>"),
            Self::MapKeyIterate => f.write_str("<map key iterate>"),
            Self::Entry(key) => write!(f, "{key:?}"),
            Self::Value => f.write_str("value"),
        }
    }
}

impl From<&str> for DepKey {
    fn from(name: &str) -> Self {
        Self::Field(Arc::from(name))
    }
}

impl From<usize> for DepKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Kind of read being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// Kind of write being triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

/// A computed, seen from the dependency graph.
pub(crate) trait ComputedSource: Send + Sync {
    /// Bring the cached value up to date.
    fn refresh(&self);

    /// The computed's inputs changed: tell its readers it might have too.
    fn propagate(&self);
}

/// The set of effects subscribed to one `(target, key)` pair.
pub struct Dep {
    target: TargetId,
    key: DepKey,
    subscribers: Mutex<IndexMap<EffectId, Weak<EffectInner>>>,
    computed: Option<Weak<dyn ComputedSource>>,
    in_store: bool,
}

impl Dep {
    pub(crate) fn new(target: TargetId, key: DepKey) -> Self {
        Self {
            target,
            key,
            subscribers: Mutex::new(IndexMap::new()),
            computed: None,
            in_store: false,
        }
    }

    /// A dep indexed in the store under `(target, key)`.
    fn stored(target: TargetId, key: DepKey) -> Self {
        Self {
            in_store: true,
            ..Self::new(target, key)
        }
    }

    /// The dep a computed exposes to its readers.
    pub(crate) fn for_computed(target: TargetId, computed: Weak<dyn ComputedSource>) -> Self {
        Self {
            computed: Some(computed),
            ..Self::new(target, DepKey::Value)
        }
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn key(&self) -> &DepKey {
        &self.key
    }

    /// Number of live subscribed effects.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .values()
            .filter(|effect| effect.strong_count() > 0)
            .count()
    }

    pub(crate) fn contains(&self, effect: EffectId) -> bool {
        self.subscribers.lock().contains_key(&effect)
    }

    pub(crate) fn computed(&self) -> Option<Arc<dyn ComputedSource>> {
        self.computed.as_ref().and_then(Weak::upgrade)
    }

    /// Unsubscribe `effect`. A store dep left without subscribers is
    /// dropped from the store.
    pub(crate) fn remove(&self, effect: EffectId) {
        let now_empty = {
            let mut subscribers = self.subscribers.lock();
            subscribers.shift_remove(&effect);
            subscribers.is_empty()
        };
        if now_empty && self.in_store {
            prune(self);
        }
    }

    /// Snapshot of the live subscribers, pruning dead ones.
    ///
    /// Notifying an effect may re-enter tracking on this very dep, so
    /// callers iterate the snapshot rather than the live set.
    fn snapshot(&self) -> Vec<Arc<EffectInner>> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, effect| effect.strong_count() > 0);
        subscribers.values().filter_map(Weak::upgrade).collect()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("target", &self.target)
            .field("key", &self.key)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Old and new values attached to a trigger, for debugger hooks.
pub(crate) struct TriggerInfo<'a> {
    pub op: TriggerOp,
    pub new_value: Option<&'a Value>,
    pub old_value: Option<&'a Value>,
}

type DepsMap = HashMap<DepKey, Arc<Dep>>;

static STORE: OnceLock<DashMap<TargetId, DepsMap>> = OnceLock::new();

fn store() -> &'static DashMap<TargetId, DepsMap> {
    STORE.get_or_init(DashMap::new)
}

/// Record that the active effect read `key` of `target`.
///
/// A no-op unless tracking is enabled and an effect is running.
pub fn track(target: TargetId, op: TrackOp, key: DepKey) {
    if !ReactiveContext::is_tracking() {
        return;
    }
    let Some(effect) = ReactiveContext::active_effect() else {
        return;
    };

    let dep = {
        let mut deps = store().entry(target).or_default();
        let existing = deps.get(&key).cloned();
        existing.unwrap_or_else(|| {
            let dep = Arc::new(Dep::stored(target, key.clone()));
            deps.insert(key, dep.clone());
            dep
        })
    };

    track_effect(&effect, &dep, DebugOp::Track(op));
}

/// Link the active effect (if any) with a dep owned outside the store.
pub(crate) fn track_owned(dep: &Arc<Dep>) {
    if !ReactiveContext::is_tracking() {
        return;
    }
    if let Some(effect) = ReactiveContext::active_effect() {
        track_effect(&effect, dep, DebugOp::Track(TrackOp::Get));
    }
}

fn track_effect(effect: &Arc<EffectInner>, dep: &Arc<Dep>, op: DebugOp) {
    if !effect.is_active() {
        return;
    }

    let inserted = dep
        .subscribers
        .lock()
        .insert(effect.id(), Arc::downgrade(effect))
        .is_none();

    if inserted {
        effect.link(dep);
        tracing::trace!(effect = ?effect.id(), target = ?dep.target, key = %dep.key, "track");
        effect.on_track(|| DebuggerEvent {
            effect: effect.id(),
            target: dep.target,
            op,
            key: dep.key.clone(),
            new_value: None,
            old_value: None,
        });
    }
}

/// Notify everything that depends on `key` of `target`.
///
/// `kind` decides which synthetic keys a structural change also touches.
/// For a list length change, `new_value` carries the new length.
pub fn trigger(
    target: TargetId,
    kind: TargetKind,
    op: TriggerOp,
    key: Option<DepKey>,
    new_value: Option<&Value>,
    old_value: Option<&Value>,
) {
    let deps = {
        let Some(deps_map) = store().get(&target) else {
            // never been tracked
            return;
        };
        collect_deps(&deps_map, kind, op, key.as_ref(), new_value)
    };

    if deps.is_empty() {
        return;
    }

    tracing::trace!(?target, ?op, key = ?key, deps = deps.len(), "trigger");

    let info = TriggerInfo {
        op,
        new_value,
        old_value,
    };
    let _paused = SchedulingPause::new();
    for dep in deps {
        trigger_dep(&dep, DirtyLevel::Dirty, Some(&info));
    }
}

fn collect_deps(
    deps_map: &DepsMap,
    kind: TargetKind,
    op: TriggerOp,
    key: Option<&DepKey>,
    new_value: Option<&Value>,
) -> Vec<Arc<Dep>> {
    if op == TriggerOp::Clear {
        // collection being cleared, trigger all effects for target
        return deps_map.values().cloned().collect();
    }

    let mut deps: Vec<Arc<Dep>> = Vec::new();

    if kind == TargetKind::List && matches!(key, Some(DepKey::Length)) {
        let new_length = new_value
            .and_then(Value::as_number)
            .map_or(0, |length| length.max(0.0) as usize);
        for (dep_key, dep) in deps_map {
            match dep_key {
                DepKey::Length | DepKey::Iterate => deps.push(dep.clone()),
                DepKey::Index(index) if *index >= new_length => deps.push(dep.clone()),
                _ => {}
            }
        }
        return deps;
    }

    let mut keys: Vec<DepKey> = key.into_iter().cloned().collect();
    match (op, kind) {
        (TriggerOp::Add, TargetKind::List) => {
            keys.push(DepKey::Length);
            keys.push(DepKey::Iterate);
        }
        (TriggerOp::Add | TriggerOp::Delete, TargetKind::Map) => {
            keys.push(DepKey::Iterate);
            keys.push(DepKey::MapKeyIterate);
        }
        (TriggerOp::Add | TriggerOp::Delete, _) => keys.push(DepKey::Iterate),
        (TriggerOp::Set, TargetKind::Map | TargetKind::List) => keys.push(DepKey::Iterate),
        _ => {}
    }

    deps.extend(keys.iter().filter_map(|key| deps_map.get(key).cloned()));
    deps
}

/// Raise the dirty level of every effect subscribed to `dep`.
pub(crate) fn trigger_dep(dep: &Dep, level: DirtyLevel, info: Option<&TriggerInfo<'_>>) {
    let _paused = SchedulingPause::new();

    for effect in dep.snapshot() {
        // Skip effects that unsubscribed while an earlier one was notified.
        if !dep.contains(effect.id()) {
            continue;
        }

        if !effect.raise_dirty_level(level) {
            continue;
        }

        effect.on_trigger(|| DebuggerEvent {
            effect: effect.id(),
            target: dep.target,
            op: DebugOp::Trigger(info.map_or(TriggerOp::Set, |info| info.op)),
            key: dep.key.clone(),
            new_value: info.and_then(|info| info.new_value.cloned()),
            old_value: info.and_then(|info| info.old_value.cloned()),
        });
        effect.notify();
        if effect.may_schedule() {
            super::context::queue_scheduler(effect);
        }
    }
}

/// Remove an emptied dep from the store, and its target's map once that
/// is empty too.
///
/// Lock order is store shard, then subscribers. The entry is only removed
/// if it is still this dep and nobody subscribed in the meantime.
fn prune(dep: &Dep) {
    let Some(store) = STORE.get() else {
        return;
    };
    let target_empty = {
        let Some(mut deps) = store.get_mut(&dep.target) else {
            return;
        };
        let stale = deps.get(&dep.key).is_some_and(|current| {
            std::ptr::eq(Arc::as_ptr(current), dep) && current.subscribers.lock().is_empty()
        });
        if stale {
            deps.remove(&dep.key);
            tracing::trace!(target = ?dep.target, key = %dep.key, "dep pruned");
        }
        deps.is_empty()
    };
    if target_empty {
        store.remove_if(&dep.target, |_, deps| deps.is_empty());
    }
}

/// Drop every dep of a target that no longer exists.
pub(crate) fn forget(target: TargetId) {
    if let Some(store) = STORE.get() {
        store.remove(&target);
    }
}

/// Number of keys of `target` with at least one subscriber.
pub fn tracked_key_count(target: TargetId) -> usize {
    store().get(&target).map_or(0, |deps| deps.len())
}

/// Number of live effects subscribed to `key` of `target`.
pub fn subscriber_count(target: TargetId, key: &DepKey) -> usize {
    store()
        .get(&target)
        .and_then(|deps| deps.get(key).cloned())
        .map_or(0, |dep| dep.subscriber_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, EffectOptions};
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting_effect(target: TargetId, key: DepKey) -> (Effect, Arc<AtomicI32>) {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            track(target, TrackOp::Get, key.clone());
        });
        (effect, runs)
    }

    #[test]
    fn track_is_noop_outside_effects() {
        let target = TargetId::new();
        track(target, TrackOp::Get, DepKey::from("a"));
        assert_eq!(tracked_key_count(target), 0);
    }

    #[test]
    fn trigger_reruns_subscribed_effect() {
        let target = TargetId::new();
        let (_effect, runs) = counting_effect(target, DepKey::from("a"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(subscriber_count(target, &DepKey::from("a")), 1);

        trigger(target, TargetKind::Record, TriggerOp::Set, Some(DepKey::from("a")), None, None);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        trigger(target, TargetKind::Record, TriggerOp::Set, Some(DepKey::from("b")), None, None);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn add_triggers_iteration_subscribers() {
        let target = TargetId::new();
        let (_effect, runs) = counting_effect(target, DepKey::Iterate);

        trigger(target, TargetKind::Record, TriggerOp::Set, Some(DepKey::from("x")), None, None);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        trigger(target, TargetKind::Record, TriggerOp::Add, Some(DepKey::from("x")), None, None);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn map_value_update_skips_key_iteration() {
        let target = TargetId::new();
        let (_keys, key_runs) = counting_effect(target, DepKey::MapKeyIterate);
        let (_values, value_runs) = counting_effect(target, DepKey::Iterate);

        let key = DepKey::Entry(Value::from("k"));
        trigger(target, TargetKind::Map, TriggerOp::Set, Some(key.clone()), None, None);
        assert_eq!(key_runs.load(Ordering::SeqCst), 1);
        assert_eq!(value_runs.load(Ordering::SeqCst), 2);

        trigger(target, TargetKind::Map, TriggerOp::Add, Some(key), None, None);
        assert_eq!(key_runs.load(Ordering::SeqCst), 2);
        assert_eq!(value_runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn list_truncation_triggers_removed_indices_only() {
        let target = TargetId::new();
        let (_kept, kept_runs) = counting_effect(target, DepKey::Index(0));
        let (_removed, removed_runs) = counting_effect(target, DepKey::Index(3));

        let new_length = Value::from(2);
        trigger(
            target,
            TargetKind::List,
            TriggerOp::Set,
            Some(DepKey::Length),
            Some(&new_length),
            None,
        );

        assert_eq!(kept_runs.load(Ordering::SeqCst), 1);
        assert_eq!(removed_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_triggers_every_key() {
        let target = TargetId::new();
        let (_a, a_runs) = counting_effect(target, DepKey::Entry(Value::from(1)));
        let (_b, b_runs) = counting_effect(target, DepKey::Entry(Value::from(2)));

        trigger(target, TargetKind::Set, TriggerOp::Clear, None, None, None);
        assert_eq!(a_runs.load(Ordering::SeqCst), 2);
        assert_eq!(b_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn effect_triggered_by_two_keys_runs_once() {
        let target = TargetId::new();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let _effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            track(target, TrackOp::Get, DepKey::Index(0));
            track(target, TrackOp::Iterate, DepKey::Iterate);
        });

        trigger(target, TargetKind::List, TriggerOp::Set, Some(DepKey::Index(0)), None, None);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn forget_drops_target_deps() {
        let target = TargetId::new();
        let (_effect, _runs) = counting_effect(target, DepKey::from("a"));
        assert_eq!(tracked_key_count(target), 1);

        forget(target);
        assert_eq!(tracked_key_count(target), 0);
    }

    #[test]
    fn emptied_deps_leave_the_store() {
        let target = TargetId::new();
        let key = crate::reactive::Signal::new(0usize);
        let key_clone = key.clone();
        let _effect = Effect::new(move || {
            track(target, TrackOp::Get, DepKey::Index(key_clone.get()));
        });

        for next in 1..=100 {
            key.set(next);
        }
        assert_eq!(tracked_key_count(target), 1);
        assert_eq!(subscriber_count(target, &DepKey::Index(100)), 1);
        assert_eq!(subscriber_count(target, &DepKey::Index(0)), 0);
    }

    #[test]
    fn shared_dep_survives_one_subscriber_leaving() {
        let target = TargetId::new();
        let (first, _) = counting_effect(target, DepKey::from("a"));
        let (_second, runs) = counting_effect(target, DepKey::from("a"));

        first.stop();
        assert_eq!(tracked_key_count(target), 1);
        trigger(target, TargetKind::Record, TriggerOp::Set, Some(DepKey::from("a")), None, None);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stopped_effect_is_unsubscribed() {
        let target = TargetId::new();
        let (effect, runs) = counting_effect(target, DepKey::from("a"));
        effect.stop();

        assert_eq!(subscriber_count(target, &DepKey::from("a")), 0);
        trigger(target, TargetKind::Record, TriggerOp::Set, Some(DepKey::from("a")), None, None);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lazy_effect_is_not_tracked_until_run() {
        let target = TargetId::new();
        let effect = Effect::with_options(
            move || track(target, TrackOp::Get, DepKey::from("a")),
            EffectOptions::default().lazy(),
        );
        assert_eq!(subscriber_count(target, &DepKey::from("a")), 0);
        effect.run();
        assert_eq!(subscriber_count(target, &DepKey::from("a")), 1);
    }
}
