//! String-keyed records.

use std::sync::Arc;

use indexmap::IndexMap;

use super::proxy::Proxy;
use super::target::{Target, TargetData, TargetKind};
use super::value::{SameValue, Value};
use super::impl_view;
use crate::reactive::dep::{DepKey, TrackOp, TriggerOp};

/// A record seen through an observing handle.
///
/// Each field is tracked on its own; `keys`, `len` and `entries` also track
/// the record's shape, so adding or deleting a field reruns them.
#[derive(Clone)]
pub struct ReactiveRecord {
    proxy: Proxy,
}

impl_view!(ReactiveRecord, TargetKind::Record, Target::record());

enum Write {
    Unchanged,
    Added,
    Changed(Value),
}

impl ReactiveRecord {
    pub fn from_pairs<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        Self::from_target(&Target::record_from(fields))
    }

    fn read<R: Default>(&self, f: impl FnOnce(&IndexMap<Arc<str>, Value>) -> R) -> R {
        self.proxy.target().read(|data| match data {
            TargetData::Record(fields) => f(fields),
            _ => R::default(),
        })
    }

    fn write<R: Default>(&self, f: impl FnOnce(&mut IndexMap<Arc<str>, Value>) -> R) -> R {
        self.proxy.target().write(|data| match data {
            TargetData::Record(fields) => f(fields),
            _ => R::default(),
        })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let value = self.read(|fields| fields.get(key).cloned());
        self.proxy.track(TrackOp::Get, DepKey::from(key));
        value.map(|value| self.proxy.wrap_child(value))
    }

    /// Write a field. Returns `false` if the handle is readonly.
    ///
    /// Dependents rerun only if the field was added or its value changed.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        if self.proxy.reject_write(key) {
            return false;
        }
        let value = self.proxy.store_form(value.into());

        let outcome = self.write(|fields| match fields.get_mut(key) {
            Some(slot) if slot.same_value(&value) => Some(Write::Unchanged),
            Some(slot) => Some(Write::Changed(std::mem::replace(slot, value.clone()))),
            None => {
                fields.insert(Arc::from(key), value.clone());
                Some(Write::Added)
            }
        });

        match outcome {
            Some(Write::Added) => {
                self.proxy
                    .trigger(TriggerOp::Add, Some(DepKey::from(key)), Some(&value), None)
            }
            Some(Write::Changed(old)) => self.proxy.trigger(
                TriggerOp::Set,
                Some(DepKey::from(key)),
                Some(&value),
                Some(&old),
            ),
            Some(Write::Unchanged) | None => {}
        }
        true
    }

    pub fn has(&self, key: &str) -> bool {
        let present = self.read(|fields| fields.contains_key(key));
        self.proxy.track(TrackOp::Has, DepKey::from(key));
        present
    }

    /// Remove a field. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        if self.proxy.reject_write(key) {
            return false;
        }
        let old = self.write(|fields| fields.shift_remove(key));
        match old {
            Some(old) => {
                self.proxy
                    .trigger(TriggerOp::Delete, Some(DepKey::from(key)), None, Some(&old));
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<Arc<str>> {
        self.proxy.track(TrackOp::Iterate, DepKey::Iterate);
        self.read(|fields| fields.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.proxy.track(TrackOp::Iterate, DepKey::Iterate);
        self.read(IndexMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every field, in insertion order. Tracks the shape and each field.
    pub fn entries(&self) -> Vec<(Arc<str>, Value)> {
        self.proxy.track(TrackOp::Iterate, DepKey::Iterate);
        let entries: Vec<(Arc<str>, Value)> = self.read(|fields| {
            fields
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        });
        entries
            .into_iter()
            .map(|(key, value)| {
                self.proxy.track(TrackOp::Get, DepKey::Field(key.clone()));
                let value = self.proxy.wrap_child(value);
                (key, value)
            })
            .collect()
    }
}
