//! Observing handles.
//!
//! A [`Proxy`] pairs a [`Target`] with a [`Mode`]. Reads through it track,
//! writes through it trigger. For a given target at most one proxy per mode
//! exists at a time: handles are cached by identity, and the cache only
//! holds `Weak` references so it never keeps a target alive.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use serde::Serialize;

use super::target::{Target, TargetKind};
use super::value::Value;
use crate::error::{self, ReactiveError};
use crate::reactive::dep::{self, DepKey, TrackOp, TriggerOp};
use crate::reactive::TargetId;

/// How a proxy observes its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Mode {
    /// Writes are rejected.
    pub readonly: bool,
    /// Nested composites are returned raw.
    pub shallow: bool,
}

impl Mode {
    pub const REACTIVE: Mode = Mode {
        readonly: false,
        shallow: false,
    };
    pub const SHALLOW_REACTIVE: Mode = Mode {
        readonly: false,
        shallow: true,
    };
    pub const READONLY: Mode = Mode {
        readonly: true,
        shallow: false,
    };
    pub const SHALLOW_READONLY: Mode = Mode {
        readonly: true,
        shallow: true,
    };

    pub(crate) fn label(self) -> &'static str {
        match (self.readonly, self.shallow) {
            (false, false) => "Reactive",
            (false, true) => "ShallowReactive",
            (true, false) => "Readonly",
            (true, true) => "ShallowReadonly",
        }
    }
}

/// Cache identity: target, mode, and whether reads track.
///
/// A readonly view over a reactive handle tracks (its target can still
/// change through the reactive handle); a readonly view over raw data
/// cannot change and does not.
pub(crate) type ProxyKey = (TargetId, Mode, bool);

struct ProxyInner {
    target: Target,
    mode: Mode,
    tracked: bool,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if let Some(cache) = PROXIES.get() {
            let key = (self.target.id(), self.mode, self.tracked);
            cache.remove_if(&key, |_, weak| weak.strong_count() == 0);
        }
    }
}

static PROXIES: OnceLock<DashMap<ProxyKey, Weak<ProxyInner>>> = OnceLock::new();

fn proxies() -> &'static DashMap<ProxyKey, Weak<ProxyInner>> {
    PROXIES.get_or_init(DashMap::new)
}

/// An observing handle over a [`Target`].
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    /// Get or create the handle for `target` in `mode`.
    pub(crate) fn wrap(target: &Target, mode: Mode, tracked: bool) -> Proxy {
        let key = (target.id(), mode, tracked);
        let mut entry = proxies().entry(key).or_insert_with(Weak::new);
        if let Some(inner) = entry.upgrade() {
            return Proxy { inner };
        }

        let inner = Arc::new(ProxyInner {
            target: target.clone(),
            mode,
            tracked,
        });
        *entry = Arc::downgrade(&inner);
        Proxy { inner }
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn id(&self) -> TargetId {
        self.inner.target.id()
    }

    pub fn kind(&self) -> TargetKind {
        self.inner.target.kind()
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.mode.readonly
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.mode.shallow
    }

    /// Whether reads through this handle are tracked.
    pub fn is_tracked(&self) -> bool {
        self.inner.tracked
    }

    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn cache_key(&self) -> ProxyKey {
        (self.id(), self.inner.mode, self.inner.tracked)
    }

    pub(crate) fn track(&self, op: TrackOp, key: DepKey) {
        if self.inner.tracked {
            dep::track(self.id(), op, key);
        }
    }

    pub(crate) fn trigger(
        &self,
        op: TriggerOp,
        key: Option<DepKey>,
        new_value: Option<&Value>,
        old_value: Option<&Value>,
    ) {
        dep::trigger(self.id(), self.kind(), op, key, new_value, old_value);
    }

    /// Warn and return `true` when this handle may not write.
    pub(crate) fn reject_write(&self, key: impl fmt::Display) -> bool {
        if self.is_readonly() {
            error::warn(ReactiveError::ReadonlyWrite {
                key: key.to_string(),
            });
            return true;
        }
        false
    }

    /// A value read out of the target, as this handle hands it out.
    pub(crate) fn wrap_child(&self, value: Value) -> Value {
        if self.is_shallow() {
            return value;
        }
        let mode = Mode {
            readonly: self.is_readonly(),
            shallow: false,
        };
        match value {
            Value::Object(target) if !target.is_marked_raw() => {
                Value::Reactive(Proxy::wrap(&target, mode, self.inner.tracked))
            }
            Value::Reactive(proxy) if self.is_readonly() && !proxy.is_readonly() => {
                Value::Reactive(Proxy::wrap(proxy.target(), mode, true))
            }
            other => other,
        }
    }

    /// A value about to be written, as the target stores it.
    pub(crate) fn store_form(&self, value: Value) -> Value {
        if self.is_shallow() {
            value
        } else {
            value.to_raw()
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("target", &self.id())
            .field("kind", &self.kind())
            .field("mode", &self.inner.mode)
            .field("tracked", &self.inner.tracked)
            .finish()
    }
}

/// Number of live handles in the cache.
pub fn cached_proxy_count() -> usize {
    proxies()
        .iter()
        .filter(|entry| entry.value().strong_count() > 0)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_proxy_per_target_and_mode() {
        let target = Target::record();
        let a = Proxy::wrap(&target, Mode::REACTIVE, true);
        let b = Proxy::wrap(&target, Mode::REACTIVE, true);
        let c = Proxy::wrap(&target, Mode::READONLY, false);

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn cache_does_not_keep_proxies_alive() {
        let target = Target::record();
        let key = (target.id(), Mode::REACTIVE, true);
        let proxy = Proxy::wrap(&target, Mode::REACTIVE, true);
        assert!(proxies().get(&key).is_some());

        drop(proxy);
        assert!(proxies().get(&key).is_none());
    }

    #[test]
    fn deep_handles_wrap_children() {
        let child = Target::list();
        let proxy = Proxy::wrap(&Target::record(), Mode::READONLY, false);

        let wrapped = proxy.wrap_child(Value::from(child.clone()));
        let wrapped = wrapped.as_proxy().unwrap();
        assert!(wrapped.is_readonly());
        assert!(wrapped.target().ptr_eq(&child));
    }

    #[test]
    fn shallow_handles_return_children_raw() {
        let child = Target::list();
        let proxy = Proxy::wrap(&Target::record(), Mode::SHALLOW_REACTIVE, true);
        assert_eq!(proxy.wrap_child(Value::from(child.clone())), Value::from(child));
    }

    #[test]
    fn marked_children_stay_raw() {
        let child = Target::list();
        child.mark_raw();
        let proxy = Proxy::wrap(&Target::record(), Mode::REACTIVE, true);
        assert!(proxy.wrap_child(Value::from(child)).as_proxy().is_none());
    }
}
