//! Weft Core
//!
//! This crate provides the reactive engine behind Weft: dependency
//! tracking, lazy derived values and job scheduling. It implements:
//!
//! - Observable state (records, lists, maps and sets behind tracked handles)
//! - Reactive primitives (effects, computeds, signals, scopes)
//! - A job queue with pre- and post-flush ordering
//! - Watchers with cleanup and flush control
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observe`: the observable layer, wrapping plain values in handles whose
//!   reads track and whose writes trigger
//! - `reactive`: the dependency store, effects, computeds, signals and scopes
//! - `scheduler`: the job queue and flush passes
//! - `watch`: watchers built from the above
//! - `error` / `config`: the reporting hook and runtime configuration
//!
//! # Example
//!
//! ```rust
//! use weft_core::observe::ReactiveRecord;
//! use weft_core::reactive::{Computed, Effect};
//!
//! // Create observable state
//! let state = ReactiveRecord::from_pairs([("count", 0)]);
//!
//! // Create a derived value
//! let reader = state.clone();
//! let doubled = Computed::new(move || {
//!     reader.get("count").and_then(|v| v.as_number()).unwrap_or(0.0) * 2.0
//! });
//!
//! // Create an effect
//! let view = doubled.clone();
//! let _effect = Effect::new(move || {
//!     println!("Doubled: {}", view.get());
//! });
//!
//! // Update the state
//! state.set("count", 5);
//! // Effect automatically runs, prints: "Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod observe;
pub mod reactive;
pub mod scheduler;
pub mod watch;

pub use config::{configure, Config, ConfigError};
pub use error::{set_error_handler, take_error_handler, ErrorOrigin, ReactiveError, Severity};
pub use observe::{reactive, readonly, shallow_reactive, shallow_readonly, Value};
pub use reactive::{
    computed, effect, stop, writable_computed, Computed, Effect, EffectOptions, EffectScope,
    Signal,
};
pub use scheduler::{flush_jobs, next_tick};
pub use watch::{watch, watch_effect, Flush, WatchHandle, WatchOptions, WatchSource};
