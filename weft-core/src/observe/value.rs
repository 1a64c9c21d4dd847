//! The dynamic value model.
//!
//! Observable state is made of [`Value`]s. Scalars are stored inline;
//! composites live in a shared [`Target`] and are either held raw
//! (`Value::Object`) or through an observing handle (`Value::Reactive`).
//!
//! # Equality
//!
//! Two notions are used:
//!
//! - [`SameValue`] decides whether a write changed anything. `NaN` equals
//!   itself and `+0.0` differs from `-0.0`.
//! - `PartialEq`/`Hash` on `Value` use SameValueZero (`+0.0 == -0.0`), which
//!   is what map keys, set members and list searches need.
//!
//! Composites always compare by identity. A raw target and a handle over it
//! are different values.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::proxy::Proxy;
use super::target::Target;
use crate::reactive::TargetId;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    /// A composite accessed without observation.
    Object(Target),
    /// A composite accessed through an observing handle.
    Reactive(Proxy),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Self::Reactive(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// The composite behind this value, observed or not.
    pub fn target(&self) -> Option<&Target> {
        match self {
            Self::Object(target) => Some(target),
            Self::Reactive(proxy) => Some(proxy.target()),
            _ => None,
        }
    }

    /// Identity of the composite behind this value.
    pub fn target_id(&self) -> Option<TargetId> {
        self.target().map(Target::id)
    }

    pub fn is_composite(&self) -> bool {
        self.target().is_some()
    }

    /// This value with any observing handle removed.
    pub fn to_raw(&self) -> Value {
        match self {
            Self::Reactive(proxy) => Self::Object(proxy.target().clone()),
            other => other.clone(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Object(target) => target.kind().name(),
            Self::Reactive(proxy) => proxy.kind().name(),
        }
    }
}

/// Equality used to decide whether a write is a change.
///
/// Float implementations treat `NaN` as equal to itself and distinguish
/// the two zeros. Everything else is plain `==`.
pub trait SameValue {
    fn same_value(&self, other: &Self) -> bool;
}

macro_rules! impl_same_value_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SameValue for $ty {
                #[inline]
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_same_value_by_eq!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
    String, Arc<str>, &'static str,
);

macro_rules! impl_same_value_float {
    ($($ty:ty),*) => {
        $(
            impl SameValue for $ty {
                #[inline]
                fn same_value(&self, other: &Self) -> bool {
                    (self.is_nan() && other.is_nan()) || self.to_bits() == other.to_bits()
                }
            }
        )*
    };
}

impl_same_value_float!(f32, f64);

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: SameValue> SameValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

impl SameValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.same_value(b),
            _ => self == other,
        }
    }
}

// SameValueZero
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Reactive(a), Self::Reactive(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Number(n) => {
                let canonical = if n.is_nan() {
                    f64::NAN.to_bits()
                } else if *n == 0.0 {
                    0u64
                } else {
                    n.to_bits()
                };
                canonical.hash(state);
            }
            Self::Str(s) => s.hash(state),
            Self::Object(target) => target.id().hash(state),
            Self::Reactive(proxy) => proxy.cache_key().hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Object(target) => write!(f, "{}#{}", target.kind().name(), target.id().raw()),
            Self::Reactive(proxy) => write!(
                f,
                "{}({}#{})",
                proxy.mode().label(),
                proxy.kind().name(),
                proxy.id().raw()
            ),
        }
    }
}

/// Composites serialize as a reference (`{"$target": id, "kind": ...}`),
/// never by content, so cyclic state is always serializable.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Object(_) | Self::Reactive(_) => {
                let mut map = serializer.serialize_map(Some(2))?;
                if let Some(target) = self.target() {
                    map.serialize_entry("$target", &target.id())?;
                    map.serialize_entry("kind", &target.kind())?;
                }
                map.end()
            }
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Self::Number(n as f64)
                }
            }
        )*
    };
}

impl_from_number!(f64, f32, i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<Target> for Value {
    fn from(target: Target) -> Self {
        Self::Object(target)
    }
}

impl From<Proxy> for Value {
    fn from(proxy: Proxy) -> Self {
        Self::Reactive(proxy)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Builds raw composites: JSON objects become records, arrays lists.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::from(s),
            Json::Array(items) => Self::Object(Target::list_from(items)),
            Json::Object(fields) => Self::Object(Target::record_from(fields)),
        }
    }
}
