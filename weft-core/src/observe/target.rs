//! Raw composite storage.
//!
//! A [`Target`] is the identity-bearing object the dependency store is
//! keyed on. Reading or writing a target directly never tracks or
//! triggers; observation happens through a [`Proxy`](super::Proxy).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::Serialize;

use super::value::Value;
use crate::reactive::{dep, TargetId};

/// The shape of a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TargetKind {
    /// String-keyed fields.
    Record,
    /// Indexed elements with a length.
    List,
    /// Arbitrary keys to values.
    Map,
    /// Unique members.
    Set,
}

impl TargetKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::List => "list",
            Self::Map => "map",
            Self::Set => "set",
        }
    }
}

/// Storage of a composite.
#[derive(Clone)]
pub enum TargetData {
    Record(IndexMap<Arc<str>, Value>),
    List(Vec<Value>),
    Map(IndexMap<Value, Value>),
    Set(IndexSet<Value>),
}

impl TargetData {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Record(_) => TargetKind::Record,
            Self::List(_) => TargetKind::List,
            Self::Map(_) => TargetKind::Map,
            Self::Set(_) => TargetKind::Set,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Record(fields) => fields.len(),
            Self::List(items) => items.len(),
            Self::Map(entries) => entries.len(),
            Self::Set(members) => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct TargetInner {
    id: TargetId,
    kind: TargetKind,
    skip: AtomicBool,
    data: RwLock<TargetData>,
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        dep::forget(self.id);
    }
}

/// A shared composite. Clones refer to the same object.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

impl Target {
    pub fn new(data: TargetData) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: TargetId::new(),
                kind: data.kind(),
                skip: AtomicBool::new(false),
                data: RwLock::new(data),
            }),
        }
    }

    pub fn record() -> Self {
        Self::new(TargetData::Record(IndexMap::new()))
    }

    pub fn list() -> Self {
        Self::new(TargetData::List(Vec::new()))
    }

    pub fn map() -> Self {
        Self::new(TargetData::Map(IndexMap::new()))
    }

    pub fn set() -> Self {
        Self::new(TargetData::Set(IndexSet::new()))
    }

    pub fn record_from<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        let fields = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::new(TargetData::Record(fields))
    }

    pub fn list_from<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(TargetData::List(items.into_iter().map(Into::into).collect()))
    }

    pub fn map_from<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key.into().to_raw(), value.into()))
            .collect();
        Self::new(TargetData::Map(entries))
    }

    pub fn set_from<I, V>(members: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let members = members.into_iter().map(|v| v.into().to_raw()).collect();
        Self::new(TargetData::Set(members))
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn kind(&self) -> TargetKind {
        self.inner.kind
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &Target) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Exclude this target from observation. Wrapping it returns it raw.
    pub fn mark_raw(&self) {
        self.inner.skip.store(true, Ordering::Relaxed);
    }

    pub fn is_marked_raw(&self) -> bool {
        self.inner.skip.load(Ordering::Relaxed)
    }

    /// Read the raw storage. Nothing is tracked.
    ///
    /// Do not access an observing handle of the same target inside `f`.
    pub fn read<R>(&self, f: impl FnOnce(&TargetData) -> R) -> R {
        f(&self.inner.data.read())
    }

    /// Mutate the raw storage. Nothing is triggered.
    ///
    /// Do not access an observing handle of the same target inside `f`.
    pub fn write<R>(&self, f: impl FnOnce(&mut TargetData) -> R) -> R {
        f(&mut self.inner.data.write())
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind() {
        assert_eq!(Target::record().kind(), TargetKind::Record);
        assert_eq!(Target::list_from([1, 2]).kind(), TargetKind::List);
        assert_eq!(Target::map_from([("a", 1)]).kind(), TargetKind::Map);
        assert_eq!(Target::set_from([1, 1, 2]).len(), 2);
    }

    #[test]
    fn raw_writes_are_visible_to_reads() {
        let target = Target::list_from([1]);
        target.write(|data| {
            if let TargetData::List(items) = data {
                items.push(Value::from(2));
            }
        });
        assert_eq!(target.len(), 2);
    }

    #[test]
    fn mark_raw_sticks() {
        let target = Target::record();
        assert!(!target.is_marked_raw());
        target.mark_raw();
        assert!(target.clone().is_marked_raw());
    }

    #[test]
    fn dropping_target_forgets_deps() {
        use crate::reactive::{dep::DepKey, dep::TrackOp, Effect};

        let target = Target::record();
        let id = target.id();
        let _effect = Effect::new(move || dep::track(id, TrackOp::Get, DepKey::from("a")));
        assert_eq!(dep::tracked_key_count(id), 1);

        drop(target);
        assert_eq!(dep::tracked_key_count(id), 0);
    }
}
