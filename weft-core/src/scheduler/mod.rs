//! Job Queue
//!
//! The scheduler decouples "data changed" from "work executed". Effects
//! with a `Pre` or `Post` schedule do not run inside the write that
//! triggered them; they queue a [`Job`], and the queue is drained later by
//! [`flush_jobs`] (directly, or from an async continuation via
//! [`next_tick`]).
//!
//! # Ordering
//!
//! 1. Queued jobs are deduplicated by [`JobId`]: triggering the same job
//!    twice before a flush runs it once.
//!
//! 2. Jobs run sorted by their order id, which is the creation order of the
//!    effect that owns them, so a parent's work precedes its children's.
//!    For equal ids, pre jobs go first.
//!
//! 3. Post-flush callbacks run only after the main queue, including
//!    anything queued while it was draining, is empty.
//!
//! 4. A job queued while it is running is dropped unless it allows
//!    recursion. A job that keeps re-queuing itself is cut off after
//!    [`Config::recursion_limit`](crate::config::Config) runs in one flush.
//!
//! A panicking job is reported and the flush continues.
//!
//! The queue is thread-local, like the reactive graph it serves.

mod job;
mod queue;

pub use job::{Job, JobId, JobTier};
pub use queue::{
    flush_jobs, flush_post_flush_cbs, flush_pre_flush_cbs, has_pending_flush, invalidate_job,
    next_tick, queue_job, queue_post_flush_cb, queued_job_count, schedule,
};
