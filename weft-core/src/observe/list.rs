//! Indexed lists.
//!
//! Element reads track their index, `len` tracks `Length`, and whole-list
//! reads (`to_vec`, searches) track `Iterate`.
//!
//! Mutators work on the raw storage and then trigger the difference
//! between the old and the new contents: changed indices as `Set`,
//! appended indices as `Add`, and a shrink as a `Length` change. They run
//! with tracking and scheduling paused, so an effect that pushes does not
//! subscribe to the length it changes, and dependents only run once the
//! whole mutation is visible.

use super::proxy::Proxy;
use super::target::{Target, TargetData, TargetKind};
use super::value::{SameValue, Value};
use super::impl_view;
use crate::reactive::context::{SchedulingPause, TrackingPause};
use crate::reactive::dep::{DepKey, TrackOp, TriggerOp};

/// A list seen through an observing handle.
#[derive(Clone)]
pub struct ReactiveList {
    proxy: Proxy,
}

impl_view!(ReactiveList, TargetKind::List, Target::list());

impl ReactiveList {
    pub fn from_values<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::from_target(&Target::list_from(items))
    }

    fn read<R: Default>(&self, f: impl FnOnce(&Vec<Value>) -> R) -> R {
        self.proxy.target().read(|data| match data {
            TargetData::List(items) => f(items),
            _ => R::default(),
        })
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        let value = self.read(|items| items.get(index).cloned());
        self.proxy.track(TrackOp::Get, DepKey::Index(index));
        value.map(|value| self.proxy.wrap_child(value))
    }

    pub fn len(&self) -> usize {
        self.proxy.track(TrackOp::Get, DepKey::Length);
        self.read(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every element, wrapped as this handle hands them out.
    pub fn to_vec(&self) -> Vec<Value> {
        self.proxy.track(TrackOp::Iterate, DepKey::Iterate);
        let items: Vec<Value> = self.read(Clone::clone);
        items
            .into_iter()
            .map(|value| self.proxy.wrap_child(value))
            .collect()
    }

    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.to_vec().into_iter()
    }

    /// Write one element. Writing past the end pads with `Null`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> bool {
        let value = value.into();
        self.mutate(index, Span::At(index), |items| {
            if index >= items.len() {
                items.resize(index, Value::Null);
                items.push(value);
            } else {
                items[index] = value;
            }
        })
        .is_some()
    }

    /// Append and return the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        self.mutate("push", Span::End(0), |items| {
            items.push(value);
            items.len()
        })
        .unwrap_or_else(|| self.raw_len())
    }

    pub fn pop(&self) -> Option<Value> {
        self.mutate("pop", Span::End(1), Vec::pop).flatten()
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        self.mutate("shift", Span::From(0), |items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })
        .flatten()
    }

    /// Prepend and return the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        self.mutate("unshift", Span::From(0), |items| {
            items.insert(0, value);
            items.len()
        })
        .unwrap_or_else(|| self.raw_len())
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        self.mutate("insert", Span::From(index), |items| {
            let index = index.min(items.len());
            items.insert(index, value);
        });
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        self.mutate("remove", Span::From(index), |items| {
            (index < items.len()).then(|| items.remove(index))
        })
        .flatten()
    }

    /// Set the length. Growing pads with `Null`.
    pub fn set_len(&self, len: usize) {
        self.mutate("length", Span::From(len), |items| items.resize(len, Value::Null));
    }

    pub fn truncate(&self, len: usize) {
        self.mutate("length", Span::From(len), |items| items.truncate(len));
    }

    pub fn clear(&self) {
        self.truncate(0);
    }

    /// Remove `delete_count` elements at `start`, insert `items` there, and
    /// return the removed elements.
    pub fn splice<I, V>(&self, start: usize, delete_count: usize, items: I) -> Vec<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let inserted: Vec<Value> = items.into_iter().map(Into::into).collect();
        self.mutate("splice", Span::From(start), |current| {
            let start = start.min(current.len());
            let end = start.saturating_add(delete_count).min(current.len());
            current.splice(start..end, inserted).collect::<Vec<_>>()
        })
        .unwrap_or_default()
    }

    pub fn reverse(&self) {
        self.mutate("reverse", Span::From(0), |items| items.reverse());
    }

    pub fn includes(&self, value: &Value) -> bool {
        self.search(value, |items, needle| items.contains(needle))
    }

    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.search(value, |items, needle| items.iter().position(|item| item == needle))
    }

    pub fn last_index_of(&self, value: &Value) -> Option<usize> {
        self.search(value, |items, needle| items.iter().rposition(|item| item == needle))
    }

    /// Search with `value` as given, then with its raw form.
    ///
    /// Stored elements are raw, so a handle passed in only matches through
    /// the second attempt.
    fn search<R: Default + Found>(&self, value: &Value, find: impl Fn(&[Value], &Value) -> R) -> R {
        self.proxy.track(TrackOp::Iterate, DepKey::Iterate);
        self.read(|items| {
            let found = find(items.as_slice(), value);
            if found.found() {
                return found;
            }
            match value {
                Value::Reactive(_) => find(items.as_slice(), &value.to_raw()),
                _ => found,
            }
        })
    }

    fn raw_len(&self) -> usize {
        self.read(Vec::len)
    }

    /// Apply `f` to the raw storage and trigger the difference inside
    /// `span`. Returns `None` (after a warning) on a readonly handle.
    fn mutate<R>(
        &self,
        label: impl std::fmt::Display,
        span: Span,
        f: impl FnOnce(&mut Vec<Value>) -> R,
    ) -> Option<R> {
        if self.proxy.reject_write(label) {
            return None;
        }
        let _scheduling = SchedulingPause::new();
        let _tracking = TrackingPause::new();

        let shallow = self.proxy.is_shallow();
        let (diff, result) = self.proxy.target().write(|data| match data {
            TargetData::List(items) => {
                let old_len = items.len();
                let (start, keep) = span.resolve(old_len);
                let old = region(items, start, keep);
                let result = f(items);

                let end = items.len().saturating_sub(keep);
                if !shallow {
                    for item in items.iter_mut().take(end).skip(start) {
                        if let Value::Reactive(_) = item {
                            *item = item.to_raw();
                        }
                    }
                }
                let diff = Diff {
                    start,
                    new: region(items, start, keep),
                    old,
                    old_len,
                    new_len: items.len(),
                };
                Some((diff, result))
            }
            _ => None,
        })?;

        self.trigger_diff(&diff);
        Some(result)
    }

    fn trigger_diff(&self, diff: &Diff) {
        for (offset, (before, after)) in diff.old.iter().zip(&diff.new).enumerate() {
            if !before.same_value(after) {
                self.proxy.trigger(
                    TriggerOp::Set,
                    Some(DepKey::Index(diff.start + offset)),
                    Some(after),
                    Some(before),
                );
            }
        }
        for (offset, added) in diff.new.iter().enumerate().skip(diff.old.len()) {
            self.proxy.trigger(
                TriggerOp::Add,
                Some(DepKey::Index(diff.start + offset)),
                Some(added),
                None,
            );
        }
        if diff.new_len < diff.old_len {
            self.proxy.trigger(
                TriggerOp::Set,
                Some(DepKey::Length),
                Some(&Value::from(diff.new_len)),
                Some(&Value::from(diff.old_len)),
            );
        }
    }
}

/// The part of a list a mutator may change.
#[derive(Debug, Clone, Copy)]
enum Span {
    /// Everything from this index on.
    From(usize),
    /// One slot. Past the end, the padding and the slot.
    At(usize),
    /// The last `n` elements and anything appended.
    End(usize),
}

impl Span {
    /// First index that may change, and how many trailing elements are
    /// left alone.
    fn resolve(self, len: usize) -> (usize, usize) {
        match self {
            Self::From(start) => (start.min(len), 0),
            Self::At(index) if index < len => (index, len - index - 1),
            Self::At(_) => (len, 0),
            Self::End(n) => (len.saturating_sub(n), 0),
        }
    }
}

fn region(items: &[Value], start: usize, keep: usize) -> Vec<Value> {
    let end = items.len().saturating_sub(keep);
    items.get(start..end).map(<[Value]>::to_vec).unwrap_or_default()
}

/// Contents of a span before and after a mutation.
struct Diff {
    start: usize,
    old: Vec<Value>,
    new: Vec<Value>,
    old_len: usize,
    new_len: usize,
}

/// Whether a search result is a hit.
trait Found {
    fn found(&self) -> bool;
}

impl Found for bool {
    fn found(&self) -> bool {
        *self
    }
}

impl Found for Option<usize> {
    fn found(&self) -> bool {
        self.is_some()
    }
}
