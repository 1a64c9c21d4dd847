//! Reactive Primitives
//!
//! This module implements the core reactive system: effects, computeds,
//! signals and scopes, on top of the dependency store.
//!
//! # Concepts
//!
//! ## Effects
//!
//! An Effect is a re-runnable computation. While it runs, every tracked read
//! subscribes it to the dependency it read; when one of those changes, the
//! effect is marked dirty and scheduled. Each run starts from a clean slate,
//! so dependencies are always the ones the last run actually used.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! only when read after one of its dependencies changed, and only notifies
//! its own readers when the result is actually different.
//!
//! ## Signals
//!
//! A Signal is a single observable value. Composite state lives in the
//! [`observe`](crate::observe) layer instead.
//!
//! ## Scopes
//!
//! An EffectScope collects the effects created while it runs so they can be
//! stopped together.
//!
//! # Implementation Notes
//!
//! The active effect lives in a thread-local slot, set and restored by an
//! RAII guard. Each thread therefore hosts an independent reactive graph.
//! Links between dependencies and effects are weak in both directions.

pub(crate) mod context;
pub mod dep;
mod computed;
mod effect;
mod scope;
mod signal;
mod subscriber;

pub use computed::{computed, writable_computed, Computed};
pub use context::{
    enable_tracking, pause_scheduling, pause_tracking, reset_scheduling, reset_tracking,
    untracked, ReactiveContext,
};
pub use dep::{track, trigger, DepKey, DirtyLevel, TrackOp, TriggerOp};
pub use effect::{
    effect, stop, CustomScheduler, DebugHook, DebugOp, DebuggerEvent, Effect, EffectOptions,
    Schedule,
};
pub use scope::{current_scope, on_scope_dispose, EffectScope};
pub use signal::{deep_signal, trigger_signal, Signal};
pub use subscriber::{EffectId, TargetId};
