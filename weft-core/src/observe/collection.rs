//! Maps and sets.
//!
//! These have no per-member field access to intercept, so every method
//! tracks or triggers explicitly: entry reads track the entry's raw key,
//! size and iteration track `Iterate`, and a map's `keys()` tracks
//! `MapKeyIterate` so updating a value does not rerun key iteration.
//!
//! Keys and members are always stored in raw form.

use indexmap::{IndexMap, IndexSet};

use super::proxy::Proxy;
use super::target::{Target, TargetData, TargetKind};
use super::value::{SameValue, Value};
use super::impl_view;
use crate::reactive::dep::{DepKey, TrackOp, TriggerOp};

/// A map seen through an observing handle.
#[derive(Clone)]
pub struct ReactiveMap {
    proxy: Proxy,
}

impl_view!(ReactiveMap, TargetKind::Map, Target::map());

impl ReactiveMap {
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::from_target(&Target::map_from(entries))
    }

    fn read<R: Default>(&self, f: impl FnOnce(&IndexMap<Value, Value>) -> R) -> R {
        self.proxy.target().read(|data| match data {
            TargetData::Map(entries) => f(entries),
            _ => R::default(),
        })
    }

    fn write<R: Default>(&self, f: impl FnOnce(&mut IndexMap<Value, Value>) -> R) -> R {
        self.proxy.target().write(|data| match data {
            TargetData::Map(entries) => f(entries),
            _ => R::default(),
        })
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        let key = key.to_raw();
        let value = self.read(|entries| entries.get(&key).cloned());
        self.proxy.track(TrackOp::Get, DepKey::Entry(key));
        value.map(|value| self.proxy.wrap_child(value))
    }

    pub fn has(&self, key: &Value) -> bool {
        let key = key.to_raw();
        let present = self.read(|entries| entries.contains_key(&key));
        self.proxy.track(TrackOp::Has, DepKey::Entry(key));
        present
    }

    pub fn len(&self) -> usize {
        self.proxy.track(TrackOp::Iterate, DepKey::Iterate);
        self.read(IndexMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or update an entry. Returns `false` if the handle is readonly.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> bool {
        let key = key.into().to_raw();
        if self.proxy.reject_write(format!("{key:?}")) {
            return false;
        }
        let value = self.proxy.store_form(value.into());

        let outcome = self.write(|entries| match entries.get_mut(&key) {
            Some(slot) if slot.same_value(&value) => Some(None),
            Some(slot) => Some(Some(std::mem::replace(slot, value.clone()))),
            None => {
                entries.insert(key.clone(), value.clone());
                None
            }
        });

        match outcome {
            None => self.proxy.trigger(
                TriggerOp::Add,
                Some(DepKey::Entry(key)),
                Some(&value),
                None,
            ),
            Some(Some(old)) => self.proxy.trigger(
                TriggerOp::Set,
                Some(DepKey::Entry(key)),
                Some(&value),
                Some(&old),
            ),
            Some(None) => {}
        }
        true
    }

    /// Remove an entry. Returns whether it existed.
    pub fn delete(&self, key: &Value) -> bool {
        let key = key.to_raw();
        if self.proxy.reject_write(format!("{key:?}")) {
            return false;
        }
        match self.write(|entries| entries.shift_remove(&key)) {
            Some(old) => {
                self.proxy
                    .trigger(TriggerOp::Delete, Some(DepKey::Entry(key)), None, Some(&old));
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        if self.proxy.reject_write("clear") {
            return;
        }
        let had_entries = self.write(|entries| {
            let had_entries = !entries.is_empty();
            entries.clear();
            had_entries
        });
        if had_entries {
            self.proxy.trigger(TriggerOp::Clear, None, None, None);
        }
    }

    /// Keys in insertion order. Unaffected by value-only updates.
    pub fn keys(&self) -> Vec<Value> {
        self.proxy.track(TrackOp::Iterate, DepKey::MapKeyIterate);
        let keys: Vec<Value> = self.read(|entries| entries.keys().cloned().collect());
        keys.into_iter().map(|key| self.proxy.wrap_child(key)).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.proxy.track(TrackOp::Iterate, DepKey::Iterate);
        let entries: Vec<(Value, Value)> = self.read(|entries| {
            entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        });
        entries
            .into_iter()
            .map(|(key, value)| (self.proxy.wrap_child(key), self.proxy.wrap_child(value)))
            .collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Value, &Value)) {
        for (key, value) in self.entries() {
            f(&value, &key);
        }
    }
}

/// A set seen through an observing handle.
#[derive(Clone)]
pub struct ReactiveSet {
    proxy: Proxy,
}

impl_view!(ReactiveSet, TargetKind::Set, Target::set());

impl ReactiveSet {
    pub fn from_values<I, V>(members: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::from_target(&Target::set_from(members))
    }

    fn read<R: Default>(&self, f: impl FnOnce(&IndexSet<Value>) -> R) -> R {
        self.proxy.target().read(|data| match data {
            TargetData::Set(members) => f(members),
            _ => R::default(),
        })
    }

    fn write<R: Default>(&self, f: impl FnOnce(&mut IndexSet<Value>) -> R) -> R {
        self.proxy.target().write(|data| match data {
            TargetData::Set(members) => f(members),
            _ => R::default(),
        })
    }

    pub fn has(&self, member: &Value) -> bool {
        let member = member.to_raw();
        let present = self.read(|members| members.contains(&member));
        self.proxy.track(TrackOp::Has, DepKey::Entry(member));
        present
    }

    pub fn len(&self) -> usize {
        self.proxy.track(TrackOp::Iterate, DepKey::Iterate);
        self.read(IndexSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a member. Returns whether it was newly inserted.
    pub fn add(&self, member: impl Into<Value>) -> bool {
        let member = member.into().to_raw();
        if self.proxy.reject_write(format!("{member:?}")) {
            return false;
        }
        let inserted = self.write(|members| members.insert(member.clone()));
        if inserted {
            self.proxy.trigger(
                TriggerOp::Add,
                Some(DepKey::Entry(member.clone())),
                Some(&member),
                None,
            );
        }
        inserted
    }

    /// Remove a member. Returns whether it was present.
    pub fn delete(&self, member: &Value) -> bool {
        let member = member.to_raw();
        if self.proxy.reject_write(format!("{member:?}")) {
            return false;
        }
        let removed = self.write(|members| members.shift_remove(&member));
        if removed {
            self.proxy.trigger(
                TriggerOp::Delete,
                Some(DepKey::Entry(member.clone())),
                None,
                Some(&member),
            );
        }
        removed
    }

    pub fn clear(&self) {
        if self.proxy.reject_write("clear") {
            return;
        }
        let had_members = self.write(|members| {
            let had_members = !members.is_empty();
            members.clear();
            had_members
        });
        if had_members {
            self.proxy.trigger(TriggerOp::Clear, None, None, None);
        }
    }

    pub fn values(&self) -> Vec<Value> {
        self.proxy.track(TrackOp::Iterate, DepKey::Iterate);
        let members: Vec<Value> = self.read(|members| members.iter().cloned().collect());
        members
            .into_iter()
            .map(|member| self.proxy.wrap_child(member))
            .collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Value)) {
        for member in self.values() {
            f(&member);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counting<F>(f: F) -> (Effect, Arc<AtomicI32>)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            f();
        });
        (effect, runs)
    }

    #[test]
    fn map_get_tracks_entry() {
        let map = ReactiveMap::from_entries([("a", 1), ("b", 2)]);
        let view = map.clone();
        let (_effect, runs) = counting(move || {
            view.get(&Value::from("a"));
        });

        map.set("b", 3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        map.set("a", 3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        map.set("a", 3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn map_keys_ignore_value_updates() {
        let map = ReactiveMap::from_entries([("a", 1)]);
        let keys_view = map.clone();
        let values_view = map.clone();
        let (_keys, key_runs) = counting(move || {
            keys_view.keys();
        });
        let (_values, value_runs) = counting(move || {
            values_view.values();
        });

        map.set("a", 2);
        assert_eq!(key_runs.load(Ordering::SeqCst), 1);
        assert_eq!(value_runs.load(Ordering::SeqCst), 2);

        map.set("b", 1);
        assert_eq!(key_runs.load(Ordering::SeqCst), 2);
        assert_eq!(value_runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn map_has_sees_additions() {
        let map = ReactiveMap::new();
        let view = map.clone();
        let (_effect, runs) = counting(move || {
            view.has(&Value::from(1));
        });

        map.set(1, "one");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(map.delete(&Value::from(1)));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn map_clear_triggers_every_reader() {
        let map = ReactiveMap::from_entries([("a", 1)]);
        let view = map.clone();
        let (_effect, runs) = counting(move || {
            view.get(&Value::from("a"));
        });

        map.clear();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        map.clear();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn map_keys_are_raw() {
        let key = ReactiveSet::new();
        let map = ReactiveMap::new();
        map.set(&key, 1);

        assert_eq!(map.get(&Value::from(&key)), Some(Value::from(1)));
        assert_eq!(map.get(&Value::from(key.to_raw())), Some(Value::from(1)));
    }

    #[test]
    fn map_size_tracks_structure() {
        let map = ReactiveMap::new();
        let view = map.clone();
        let (_effect, runs) = counting(move || {
            view.len();
        });

        map.set("x", 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        map.set("x", 2);
        // value update also counts as iteration for maps
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn set_membership() {
        let set = ReactiveSet::new();
        let view = set.clone();
        let (_effect, runs) = counting(move || {
            view.has(&Value::from("x"));
        });

        assert!(set.add("x"));
        assert!(!set.add("x"));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(set.delete(&Value::from("x")));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn set_iteration_tracks_size_changes() {
        let set = ReactiveSet::from_values([1, 2]);
        let view = set.clone();
        let (_effect, runs) = counting(move || {
            view.values();
        });

        set.add(3);
        set.add(3);
        set.delete(&Value::from(1));
        set.clear();
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(set.is_empty());
    }

    #[test]
    fn readonly_collections_reject_writes() {
        let map = ReactiveMap::new().readonly();
        assert!(!map.set("a", 1));
        assert_eq!(map.proxy().target().len(), 0);

        let set = ReactiveSet::new().readonly();
        assert!(!set.add(1));
        assert!(!set.delete(&Value::from(1)));
    }

    #[test]
    fn for_each_passes_value_then_key() {
        let map = ReactiveMap::from_entries([("k", "v")]);
        let mut seen = Vec::new();
        map.for_each(|value, key| seen.push((value.clone(), key.clone())));
        assert_eq!(seen, vec![(Value::from("v"), Value::from("k"))]);
    }
}
