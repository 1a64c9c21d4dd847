//! Observable Layer
//!
//! Mutable state is modeled as [`Value`]s. Composite values live in a
//! [`Target`]; wrapping one in a [`Proxy`] gives a handle whose reads are
//! tracked and whose writes trigger dependents.
//!
//! # Handles
//!
//! - [`reactive`]: deep, writable. Nested composites are wrapped lazily, on
//!   access, so cost is bounded by what is actually visited.
//! - [`shallow_reactive`]: only top-level access is observed.
//! - [`readonly`] / [`shallow_readonly`]: writes are rejected with a
//!   warning. A readonly handle over raw data does not track, since nothing
//!   can trigger it; a readonly handle over a reactive one does.
//!
//! Typed views ([`ReactiveRecord`], [`ReactiveList`], [`ReactiveMap`],
//! [`ReactiveSet`]) expose the accessor methods for each container kind.
//!
//! # Example
//!
//! ```rust
//! use weft_core::observe::ReactiveRecord;
//! use weft_core::reactive::Effect;
//!
//! let state = ReactiveRecord::from_pairs([("count", 0)]);
//!
//! let view = state.clone();
//! let _effect = Effect::new(move || {
//!     println!("count = {:?}", view.get("count"));
//! });
//!
//! state.set("count", 1); // prints "count = Some(1)"
//! ```

mod collection;
mod list;
mod proxy;
mod record;
mod target;
mod value;

use std::collections::HashSet;

pub use collection::{ReactiveMap, ReactiveSet};
pub use list::ReactiveList;
pub use proxy::{cached_proxy_count, Mode, Proxy};
pub use record::ReactiveRecord;
pub use target::{Target, TargetData, TargetKind};
pub use value::{SameValue, Value};

use crate::error::{self, ReactiveError};
use crate::reactive::TargetId;

fn wrap(value: Value, mode: Mode) -> Value {
    match value {
        Value::Object(target) if target.is_marked_raw() => Value::Object(target),
        Value::Object(target) => {
            let tracked = !mode.readonly;
            Value::Reactive(Proxy::wrap(&target, mode, tracked))
        }
        Value::Reactive(proxy) if mode.readonly && !proxy.is_readonly() => {
            Value::Reactive(Proxy::wrap(proxy.target(), mode, true))
        }
        Value::Reactive(proxy) => Value::Reactive(proxy),
        scalar => {
            error::warn(ReactiveError::NotObservable(scalar.type_name().to_string()));
            scalar
        }
    }
}

/// A deep, writable handle over `value`.
///
/// Handles are returned unchanged. Scalars are returned unchanged with a
/// warning.
pub fn reactive(value: impl Into<Value>) -> Value {
    wrap(value.into(), Mode::REACTIVE)
}

/// A writable handle observing top-level access only.
pub fn shallow_reactive(value: impl Into<Value>) -> Value {
    wrap(value.into(), Mode::SHALLOW_REACTIVE)
}

/// A deep readonly handle over `value`.
pub fn readonly(value: impl Into<Value>) -> Value {
    wrap(value.into(), Mode::READONLY)
}

/// A readonly handle whose nested composites are returned raw.
pub fn shallow_readonly(value: impl Into<Value>) -> Value {
    wrap(value.into(), Mode::SHALLOW_READONLY)
}

/// [`reactive`] for composites, identity for scalars.
pub fn to_reactive(value: impl Into<Value>) -> Value {
    match value.into() {
        composite if composite.is_composite() => reactive(composite),
        scalar => scalar,
    }
}

/// [`readonly`] for composites, identity for scalars.
pub fn to_readonly(value: impl Into<Value>) -> Value {
    match value.into() {
        composite if composite.is_composite() => readonly(composite),
        scalar => scalar,
    }
}

/// `value` with any handle removed.
pub fn to_raw(value: &Value) -> Value {
    value.to_raw()
}

pub fn is_proxy(value: &Value) -> bool {
    value.as_proxy().is_some()
}

/// Whether reads through `value` are tracked.
pub fn is_reactive(value: &Value) -> bool {
    value.as_proxy().is_some_and(Proxy::is_tracked)
}

pub fn is_readonly(value: &Value) -> bool {
    value.as_proxy().is_some_and(Proxy::is_readonly)
}

pub fn is_shallow(value: &Value) -> bool {
    value.as_proxy().is_some_and(Proxy::is_shallow)
}

/// Exclude the composite behind `value` from observation, and return it.
pub fn mark_raw(value: Value) -> Value {
    if let Some(target) = value.target() {
        target.mark_raw();
    }
    value
}

/// Read everything reachable from `value` through its handles, so the
/// active effect depends on all of it. Cycles are visited once.
pub(crate) fn traverse(value: &Value, seen: &mut HashSet<TargetId>) {
    let Value::Reactive(proxy) = value else {
        return;
    };
    if !seen.insert(proxy.id()) {
        return;
    }

    let children: Vec<Value> = match proxy.kind() {
        TargetKind::Record => ReactiveRecord::from_proxy_unchecked(proxy.clone())
            .entries()
            .into_iter()
            .map(|(_, value)| value)
            .collect(),
        TargetKind::List => ReactiveList::from_proxy_unchecked(proxy.clone()).to_vec(),
        TargetKind::Map => ReactiveMap::from_proxy_unchecked(proxy.clone())
            .entries()
            .into_iter()
            .flat_map(|(key, value)| [key, value])
            .collect(),
        TargetKind::Set => ReactiveSet::from_proxy_unchecked(proxy.clone()).values(),
    };

    for child in &children {
        traverse(child, seen);
    }
}

/// Shared plumbing of the typed views.
macro_rules! impl_view {
    ($view:ident, $kind:expr, $target_ctor:expr) => {
        impl $view {
            /// An empty, deeply reactive container.
            pub fn new() -> Self {
                Self::from_target(&$target_ctor)
            }

            /// A reactive view over `target`.
            pub fn from_target(target: &$crate::observe::Target) -> Self {
                Self {
                    proxy: $crate::observe::Proxy::wrap(
                        target,
                        $crate::observe::Mode::REACTIVE,
                        true,
                    ),
                }
            }

            /// View an existing handle. Fails on a kind mismatch.
            pub fn from_proxy(
                proxy: $crate::observe::Proxy,
            ) -> Result<Self, $crate::error::ReactiveError> {
                if proxy.kind() != $kind {
                    return Err($crate::error::ReactiveError::KindMismatch {
                        expected: $kind.name(),
                        found: proxy.kind().name(),
                    });
                }
                Ok(Self { proxy })
            }

            pub(crate) fn from_proxy_unchecked(proxy: $crate::observe::Proxy) -> Self {
                Self { proxy }
            }

            pub fn proxy(&self) -> &$crate::observe::Proxy {
                &self.proxy
            }

            /// A readonly view of the same container. Reads through it still
            /// track.
            pub fn readonly(&self) -> Self {
                let mode = $crate::observe::Mode {
                    readonly: true,
                    shallow: self.proxy.is_shallow(),
                };
                Self {
                    proxy: $crate::observe::Proxy::wrap(
                        self.proxy.target(),
                        mode,
                        self.proxy.is_tracked(),
                    ),
                }
            }

            pub fn is_readonly(&self) -> bool {
                self.proxy.is_readonly()
            }

            pub fn to_raw(&self) -> $crate::observe::Target {
                self.proxy.target().clone()
            }

            pub fn ptr_eq(&self, other: &Self) -> bool {
                self.proxy.ptr_eq(&other.proxy)
            }
        }

        impl Default for $view {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<$view> for $crate::observe::Value {
            fn from(view: $view) -> Self {
                $crate::observe::Value::Reactive(view.proxy)
            }
        }

        impl From<&$view> for $crate::observe::Value {
            fn from(view: &$view) -> Self {
                $crate::observe::Value::Reactive(view.proxy.clone())
            }
        }

        impl TryFrom<$crate::observe::Value> for $view {
            type Error = $crate::error::ReactiveError;

            /// Raw composites are wrapped in a reactive handle first.
            fn try_from(value: $crate::observe::Value) -> Result<Self, Self::Error> {
                match $crate::observe::to_reactive(value) {
                    $crate::observe::Value::Reactive(proxy) => Self::from_proxy(proxy),
                    other => Err($crate::error::ReactiveError::KindMismatch {
                        expected: $kind.name(),
                        found: other.type_name(),
                    }),
                }
            }
        }

        impl std::fmt::Debug for $view {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($view)).field(&self.proxy).finish()
            }
        }
    };
}

pub(crate) use impl_view;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{set_error_handler, take_error_handler, Severity};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn reactive_is_cached_per_target() {
        let target = Target::record();
        let a = reactive(target.clone());
        let b = reactive(target.clone());
        assert_eq!(a, b);
        assert!(is_reactive(&a));
        assert!(!is_readonly(&a));
    }

    #[test]
    fn reactive_of_handle_is_identity() {
        let handle = readonly(Target::list());
        assert_eq!(reactive(handle.clone()), handle);
    }

    #[test]
    fn readonly_over_raw_does_not_track() {
        let handle = readonly(Target::record());
        assert!(is_readonly(&handle));
        assert!(!is_reactive(&handle));
    }

    #[test]
    fn readonly_over_reactive_tracks() {
        let state = reactive(Target::record());
        let view = readonly(state.clone());
        assert!(is_readonly(&view));
        assert!(is_reactive(&view));
        assert_eq!(to_raw(&view), to_raw(&state));
    }

    #[test]
    fn shallow_modes() {
        let target = Target::set();
        assert!(is_shallow(&shallow_reactive(target.clone())));
        assert!(is_shallow(&shallow_readonly(target.clone())));
        assert!(!is_shallow(&reactive(target)));
    }

    #[test]
    fn marked_raw_is_never_wrapped() {
        let value = mark_raw(Value::from(Target::record()));
        assert!(!is_proxy(&reactive(value)));
    }

    #[test]
    fn wrapping_scalars_warns() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        set_error_handler(move |error, severity| sink.lock().push((error.clone(), severity)));

        assert_eq!(reactive(3), Value::from(3));
        assert_eq!(to_reactive(3), Value::from(3));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            (ReactiveError::NotObservable("number".into()), Severity::Warning)
        );
        drop(seen);
        take_error_handler();
    }

    #[test]
    fn typed_view_conversion_checks_kind() {
        let err = ReactiveList::try_from(Value::from(Target::record())).unwrap_err();
        assert_eq!(
            err,
            ReactiveError::KindMismatch {
                expected: "list",
                found: "record",
            }
        );
        assert!(ReactiveRecord::try_from(Value::from(Target::record())).is_ok());
    }
}
