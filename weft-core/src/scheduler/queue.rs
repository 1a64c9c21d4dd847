use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::job::{Job, JobId, JobTier};
use crate::config;
use crate::error::{self, call_guarded, ErrorOrigin, ReactiveError};

#[derive(Default)]
struct QueueState {
    queue: Vec<Job>,
    /// Index of the job running in the main queue, while flushing.
    flush_index: usize,
    flushing: bool,
    flush_pending: bool,
    pending_post: Vec<Job>,
    /// Post-flush callbacks being drained, and the index of the running one.
    active_post: Option<Vec<Job>>,
    post_flush_index: usize,
}

thread_local! {
    static STATE: RefCell<QueueState> = RefCell::new(QueueState::default());
}

fn with_state<R>(f: impl FnOnce(&mut QueueState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// Run counts per job within one flush.
type Seen = HashMap<JobId, usize>;

fn compare(a: &Job, b: &Job) -> Ordering {
    a.sort_key()
        .cmp(&b.sort_key())
        .then_with(|| b.is_pre().cmp(&a.is_pre()))
}

/// Where a job with `order` goes: after every job that must precede it.
fn insertion_index(state: &QueueState, job: &Job) -> usize {
    let start = if state.flushing {
        state.flush_index + 1
    } else {
        0
    };
    let pending = &state.queue[start.min(state.queue.len())..];
    let key = job.sort_key();
    start + pending.partition_point(|queued| {
        let queued_key = queued.sort_key();
        queued_key < key || (queued_key == key && queued.is_pre())
    })
}

/// Queue a job in the main queue. A no-op if it is already pending, or if
/// it is the job currently running and does not allow recursion.
pub fn queue_job(job: Job) {
    with_state(|state| {
        let search_from = if state.flushing {
            state.flush_index + usize::from(job.allows_recurse())
        } else {
            0
        };
        let already_queued = state
            .queue
            .iter()
            .skip(search_from)
            .any(|queued| queued.id() == job.id());
        if already_queued {
            return;
        }

        if job.order().is_none() {
            state.queue.push(job);
        } else {
            let index = insertion_index(state, &job);
            state.queue.insert(index, job);
        }
        state.flush_pending = true;
    });
}

/// Queue a callback to run after the main queue.
pub fn queue_post_flush_cb(job: Job) {
    with_state(|state| {
        let running = state.active_post.as_ref().is_some_and(|active| {
            let search_from = state.post_flush_index + usize::from(job.allows_recurse());
            active
                .iter()
                .skip(search_from)
                .any(|queued| queued.id() == job.id())
        });
        if !running {
            state.pending_post.push(job);
        }
        state.flush_pending = true;
    });
}

/// Queue (or, for [`JobTier::Sync`], run) a job at the given tier.
pub fn schedule(job: Job, tier: JobTier) {
    match tier {
        JobTier::Sync => {
            call_guarded(ErrorOrigin::SchedulerJob, || job.run());
        }
        JobTier::Pre => queue_job(job.pre()),
        JobTier::Post => queue_post_flush_cb(job),
    }
}

/// Drop a queued job that has not started yet.
pub fn invalidate_job(id: JobId) {
    with_state(|state| {
        let start = if state.flushing {
            state.flush_index + 1
        } else {
            0
        };
        if let Some(offset) = state.queue.iter().skip(start).position(|job| job.id() == id) {
            state.queue.remove(start + offset);
        }
    });
}

/// Whether any work is waiting for a flush.
pub fn has_pending_flush() -> bool {
    with_state(|state| {
        state.flush_pending || !state.queue.is_empty() || !state.pending_post.is_empty()
    })
}

/// Number of jobs in the main queue that have not run yet.
pub fn queued_job_count() -> usize {
    with_state(|state| {
        let start = if state.flushing {
            state.flush_index + 1
        } else {
            0
        };
        state.queue.len().saturating_sub(start)
    })
}

/// Count a run of `job`. Returns `true` (after reporting) once the job has
/// exceeded the recursion limit in this flush.
fn over_limit(seen: &mut Seen, job: &Job) -> bool {
    let limit = config::with_config(|c| c.recursion_limit);
    let count = seen.entry(job.id()).or_insert(0);
    *count += 1;
    if *count > limit {
        if *count == limit + 1 {
            error::report(ReactiveError::RecursionLimit { limit });
        }
        return true;
    }
    false
}

/// Run every queued pre job that has not started yet, now.
pub fn flush_pre_flush_cbs() {
    let mut seen = Seen::new();
    loop {
        let job = with_state(|state| {
            let start = if state.flushing {
                state.flush_index + 1
            } else {
                0
            };
            let offset = state.queue.iter().skip(start).position(Job::is_pre)?;
            Some(state.queue.remove(start + offset))
        });
        let Some(job) = job else {
            break;
        };
        if over_limit(&mut seen, &job) {
            continue;
        }
        call_guarded(ErrorOrigin::SchedulerJob, || job.run());
    }
}

/// Run every pending post-flush callback, in order.
pub fn flush_post_flush_cbs() {
    flush_post_flush_cbs_with(&mut Seen::new());
}

fn flush_post_flush_cbs_with(seen: &mut Seen) {
    let started = with_state(|state| {
        if state.pending_post.is_empty() {
            return false;
        }
        let mut pending = std::mem::take(&mut state.pending_post);
        let mut ids = std::collections::HashSet::new();
        pending.retain(|job| ids.insert(job.id()));

        if let Some(active) = state.active_post.as_mut() {
            // already draining: append and let the running pass pick them up
            active.extend(pending);
            return false;
        }

        pending.sort_by_key(Job::sort_key);
        state.active_post = Some(pending);
        state.post_flush_index = 0;
        true
    });
    if !started {
        return;
    }

    loop {
        let job = with_state(|state| {
            let index = state.post_flush_index;
            state.active_post.as_ref().and_then(|active| active.get(index).cloned())
        });
        let Some(job) = job else {
            break;
        };
        if !over_limit(seen, &job) {
            call_guarded(ErrorOrigin::SchedulerJob, || job.run());
        }
        with_state(|state| state.post_flush_index += 1);
    }

    with_state(|state| {
        state.active_post = None;
        state.post_flush_index = 0;
    });
}

/// Drain the main queue, then the post-flush callbacks, until both are
/// empty. A no-op when called from inside a flush.
pub fn flush_jobs() {
    let mut seen = Seen::new();

    loop {
        let started = with_state(|state| {
            if state.flushing {
                return false;
            }
            state.flushing = true;
            state.flush_pending = false;
            state.flush_index = 0;
            state.queue.sort_by(compare);
            true
        });
        if !started {
            return;
        }

        let queued = with_state(|state| state.queue.len());
        tracing::debug!(queued, "flushing jobs");

        loop {
            let job = with_state(|state| state.queue.get(state.flush_index).cloned());
            let Some(job) = job else {
                break;
            };
            if !over_limit(&mut seen, &job) {
                call_guarded(ErrorOrigin::SchedulerJob, || job.run());
            }
            with_state(|state| state.flush_index += 1);
        }

        with_state(|state| {
            state.flush_index = 0;
            state.queue.clear();
        });

        flush_post_flush_cbs_with(&mut seen);

        let more = with_state(|state| {
            state.flushing = false;
            let more = !state.queue.is_empty() || !state.pending_post.is_empty();
            state.flush_pending = more;
            more
        });
        if !more {
            return;
        }
    }
}

/// Yield to the async runtime, then drain the queue.
///
/// Synchronous writes made before the await are batched into one flush.
/// The queue is thread-local, so call this from the thread that queued the
/// work (a current-thread runtime or a `LocalSet`).
pub async fn next_tick() {
    tokio::task::yield_now().await;
    flush_jobs();
}
