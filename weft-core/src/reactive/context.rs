//! Reactive Context
//!
//! The reactive context records which effect is currently running and
//! whether reads should be tracked. This enables automatic dependency
//! tracking: when an observable is read, the active effect is registered as
//! a dependent.
//!
//! # Implementation
//!
//! The active effect lives in a thread-local slot. Entering an effect saves
//! the previous occupant in a guard and the guard's `Drop` puts it back, so
//! nesting works and the slot is restored even if the effect panics.
//!
//! The same thread-local state also holds the tracking flag stack
//! (`pause_tracking` / `enable_tracking` / `reset_tracking`) and the
//! scheduling pause counter. While scheduling is paused, effects notified by
//! a trigger are queued instead of being dispatched, so a single write marks
//! every dependent before any of them runs.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

use super::effect::EffectInner;
use super::EffectId;

thread_local! {
    static ACTIVE_EFFECT: RefCell<Option<Arc<EffectInner>>> = const { RefCell::new(None) };
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };
    static TRACK_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
    static SCHEDULE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static QUEUED_SCHEDULERS: RefCell<VecDeque<Arc<EffectInner>>> = const { RefCell::new(VecDeque::new()) };
}

/// Guard that makes an effect the active one until dropped.
///
/// Restores the previously active effect and tracking flag on drop, which
/// keeps the thread-local state consistent even if the computation panics.
pub struct ReactiveContext {
    previous: Option<Arc<EffectInner>>,
    previous_should_track: bool,
    effect_id: EffectId,
}

impl ReactiveContext {
    /// Enter the context of `effect`. Tracking is enabled inside.
    pub(crate) fn enter(effect: Arc<EffectInner>) -> Self {
        let effect_id = effect.id();
        let previous = ACTIVE_EFFECT.with(|slot| slot.borrow_mut().replace(effect));
        let previous_should_track = SHOULD_TRACK.with(|flag| flag.replace(true));

        Self {
            previous,
            previous_should_track,
            effect_id,
        }
    }

    /// Whether a read right now would be recorded as a dependency.
    pub fn is_tracking() -> bool {
        SHOULD_TRACK.with(Cell::get) && ACTIVE_EFFECT.with(|slot| slot.borrow().is_some())
    }

    /// The id of the effect currently running, if any.
    pub fn current_effect() -> Option<EffectId> {
        ACTIVE_EFFECT.with(|slot| slot.borrow().as_ref().map(|effect| effect.id()))
    }

    pub(crate) fn active_effect() -> Option<Arc<EffectInner>> {
        ACTIVE_EFFECT.with(|slot| slot.borrow().clone())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = ACTIVE_EFFECT.with(|slot| {
            std::mem::replace(&mut *slot.borrow_mut(), self.previous.take())
        });
        SHOULD_TRACK.with(|flag| flag.set(self.previous_should_track));

        // Verify we're restoring the right context.
        if let Some(effect) = popped {
            debug_assert_eq!(
                effect.id(),
                self.effect_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.effect_id,
                effect.id()
            );
        }
    }
}

/// Stop tracking reads until the matching [`reset_tracking`].
pub fn pause_tracking() {
    let previous = SHOULD_TRACK.with(|flag| flag.replace(false));
    TRACK_STACK.with(|stack| stack.borrow_mut().push(previous));
}

/// Force tracking on until the matching [`reset_tracking`].
pub fn enable_tracking() {
    let previous = SHOULD_TRACK.with(|flag| flag.replace(true));
    TRACK_STACK.with(|stack| stack.borrow_mut().push(previous));
}

/// Undo the last [`pause_tracking`] or [`enable_tracking`].
pub fn reset_tracking() {
    let previous = TRACK_STACK.with(|stack| stack.borrow_mut().pop());
    SHOULD_TRACK.with(|flag| flag.set(previous.unwrap_or(true)));
}

/// Run `f` without recording any dependencies.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _paused = TrackingPause::new();
    f()
}

/// RAII form of [`pause_tracking`] / [`reset_tracking`].
pub(crate) struct TrackingPause(());

impl TrackingPause {
    pub(crate) fn new() -> Self {
        pause_tracking();
        Self(())
    }
}

impl Drop for TrackingPause {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Defer effect schedulers until the matching [`reset_scheduling`].
pub fn pause_scheduling() {
    SCHEDULE_DEPTH.with(|depth| depth.set(depth.get() + 1));
}

/// Undo one [`pause_scheduling`]. When the last pause is lifted, every
/// queued scheduler runs in notification order.
pub fn reset_scheduling() {
    SCHEDULE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    while SCHEDULE_DEPTH.with(Cell::get) == 0 {
        let next = QUEUED_SCHEDULERS.with(|queue| queue.borrow_mut().pop_front());
        match next {
            Some(effect) => effect.dispatch_scheduler(),
            None => break,
        }
    }
}

pub(crate) fn queue_scheduler(effect: Arc<EffectInner>) {
    QUEUED_SCHEDULERS.with(|queue| queue.borrow_mut().push_back(effect));
}

/// RAII form of [`pause_scheduling`] / [`reset_scheduling`].
pub(crate) struct SchedulingPause(());

impl SchedulingPause {
    pub(crate) fn new() -> Self {
        pause_scheduling();
        Self(())
    }
}

impl Drop for SchedulingPause {
    fn drop(&mut self) {
        reset_scheduling();
    }
}
