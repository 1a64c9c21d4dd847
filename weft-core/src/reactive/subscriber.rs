//! Identifier types for the reactive system.
//!
//! Every effect (including the effects that back computeds and watchers) and
//! every observable target gets a process-unique identifier when created.
//! Effect ids double as creation order, which the job queue uses to run a
//! parent's pre-flush work before its children's.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Unique identifier for a reactive effect.
///
/// Ids are handed out from a monotonically increasing counter, so comparing
/// two ids tells which effect was created first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EffectId(u64);

impl EffectId {
    /// Generate a new unique effect ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for something that can be tracked: a composite target,
/// a signal or a computed.
///
/// This is the first level of the dependency store's `(target, key)` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TargetId(u64);

impl TargetId {
    /// Generate a new unique target ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_ids_are_unique() {
        let id1 = EffectId::new();
        let id2 = EffectId::new();
        let id3 = EffectId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn effect_ids_follow_creation_order() {
        let first = EffectId::new();
        let second = EffectId::new();
        assert!(first < second);
        assert!(first.raw() < second.raw());
    }

    #[test]
    fn target_ids_serialize_as_numbers() {
        let id = TargetId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, id.raw().to_string());
    }
}
