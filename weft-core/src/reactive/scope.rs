//! Effect Scopes
//!
//! A scope collects the effects (and computeds, and watchers) created while
//! it is running so they can be disposed together.
//!
//! # Nesting
//!
//! A scope created while another is running becomes its child and is stopped
//! with it. A detached scope has no parent and lives until stopped (or
//! dropped) on its own.
//!
//! # Ownership
//!
//! A scope owns its effects and its children. Dropping the last handle to a
//! detached scope drops the effects it owns, which disposes any that have no
//! other handle.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::effect::EffectInner;
use super::subscriber::EffectId;
use crate::error::{self, call_guarded, ErrorOrigin, ReactiveError};

type Cleanup = Box<dyn FnOnce() + Send>;

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<EffectScope>> = const { RefCell::new(None) };
}

struct ScopeInner {
    active: AtomicBool,
    detached: bool,
    effects: Mutex<Vec<Arc<EffectInner>>>,
    children: Mutex<Vec<EffectScope>>,
    cleanups: Mutex<Vec<Cleanup>>,
    parent: Weak<ScopeInner>,
}

/// A disposal group for reactive computations.
///
/// # Example
///
/// ```rust
/// use weft_core::reactive::{Effect, EffectScope, Signal};
///
/// let count = Signal::new(0);
/// let scope = EffectScope::new();
///
/// scope.run(|| {
///     let count = count.clone();
///     // Owned by the scope, so the handle can be dropped.
///     let _ = Effect::new(move || println!("count = {}", count.get()));
/// });
///
/// scope.stop();
/// count.set(1); // nothing printed
/// ```
#[derive(Clone)]
pub struct EffectScope {
    inner: Arc<ScopeInner>,
}

impl EffectScope {
    /// Create a scope. If another scope is running, the new one becomes
    /// its child.
    pub fn new() -> Self {
        let parent = current_scope().filter(EffectScope::is_active);
        let scope = Self::build(false, parent.as_ref());
        if let Some(parent) = parent {
            parent.inner.children.lock().push(scope.clone());
        }
        scope
    }

    /// Create a scope that is never collected by an enclosing one.
    pub fn detached() -> Self {
        Self::build(true, None)
    }

    fn build(detached: bool, parent: Option<&EffectScope>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                active: AtomicBool::new(true),
                detached,
                effects: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
                cleanups: Mutex::new(Vec::new()),
                parent: parent.map_or_else(Weak::new, |parent| Arc::downgrade(&parent.inner)),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached
    }

    /// Run `f` with this scope as the current one.
    ///
    /// Returns `None` (with an `InactiveScope` warning) once stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            error::warn(ReactiveError::InactiveScope);
            return None;
        }
        let _current = CurrentScopeGuard::enter(self.clone());
        Some(f())
    }

    /// Stop every owned effect and child scope, then run the dispose
    /// callbacks. Idempotent.
    pub fn stop(&self) {
        self.stop_inner(false);
    }

    fn stop_inner(&self, from_parent: bool) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }

        let effects = std::mem::take(&mut *self.inner.effects.lock());
        for effect in &effects {
            effect.stop();
        }

        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in &children {
            child.stop_inner(true);
        }

        let cleanups = std::mem::take(&mut *self.inner.cleanups.lock());
        for cleanup in cleanups {
            call_guarded(ErrorOrigin::ScopeDispose, cleanup);
        }

        if !self.inner.detached && !from_parent {
            if let Some(parent) = self.inner.parent.upgrade() {
                parent
                    .children
                    .lock()
                    .retain(|child| !Arc::ptr_eq(&child.inner, &self.inner));
            }
        }

        tracing::debug!(
            effects = effects.len(),
            children = children.len(),
            "effect scope stopped"
        );
    }

    /// Register a callback to run when this scope stops.
    ///
    /// On a stopped scope the callback runs immediately.
    pub fn on_dispose<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_active() {
            self.inner.cleanups.lock().push(Box::new(f));
        } else {
            call_guarded(ErrorOrigin::ScopeDispose, f);
        }
    }

    /// Number of effects owned directly by this scope.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.lock().len()
    }

    /// Number of child scopes still attached.
    pub fn child_count(&self) -> usize {
        self.inner.children.lock().len()
    }

    pub fn ptr_eq(&self, other: &EffectScope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("detached", &self.inner.detached)
            .field("effects", &self.effect_count())
            .field("children", &self.child_count())
            .finish()
    }
}

struct CurrentScopeGuard {
    previous: Option<EffectScope>,
}

impl CurrentScopeGuard {
    fn enter(scope: EffectScope) -> Self {
        let previous = CURRENT_SCOPE.with(|slot| slot.borrow_mut().replace(scope));
        Self { previous }
    }
}

impl Drop for CurrentScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_SCOPE.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// The scope currently running on this thread, if any.
pub fn current_scope() -> Option<EffectScope> {
    CURRENT_SCOPE.with(|slot| slot.borrow().clone())
}

/// Register a callback on the current scope.
///
/// Warns with `NoActiveScope` (and drops the callback) when no scope is
/// running.
pub fn on_scope_dispose<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match current_scope() {
        Some(scope) => scope.on_dispose(f),
        None => error::warn(ReactiveError::NoActiveScope),
    }
}

/// An effect's way back to the scope that owns it.
pub(crate) struct ScopeLink(Weak<ScopeInner>);

impl ScopeLink {
    /// Drop the scope's reference to an effect that stopped on its own.
    pub(crate) fn release(&self, effect: EffectId) {
        let Some(scope) = self.0.upgrade() else {
            return;
        };
        let released: Vec<Arc<EffectInner>> = {
            let mut effects = scope.effects.lock();
            let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *effects)
                .into_iter()
                .partition(|owned| owned.id() == effect);
            *effects = kept;
            released
        };
        drop(released);
    }
}

/// Hand a newly created effect to the running scope.
pub(crate) fn record_effect(effect: &Arc<EffectInner>) -> Option<ScopeLink> {
    let scope = current_scope().filter(EffectScope::is_active)?;
    scope.inner.effects.lock().push(effect.clone());
    Some(ScopeLink(Arc::downgrade(&scope.inner)))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
