use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a job, used for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    fn new() -> Self {
        Self(JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// When a job runs relative to the flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobTier {
    /// Immediately, never queued.
    Sync,
    /// In the main queue, before post-flush callbacks.
    Pre,
    /// After the main queue is drained.
    Post,
}

/// A unit of scheduled work. Clones share the same identity.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    order: Option<u64>,
    pre: bool,
    allow_recurse: bool,
    run: Arc<dyn Fn() + Send + Sync>,
}

impl Job {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: JobId::new(),
            order: None,
            pre: false,
            allow_recurse: false,
            run: Arc::new(run),
        }
    }

    /// Position in the queue. Jobs without one run last.
    pub fn with_order(mut self, order: u64) -> Self {
        self.order = Some(order);
        self
    }

    /// Run before non-pre jobs with the same order.
    pub fn pre(mut self) -> Self {
        self.pre = true;
        self
    }

    /// Let the job be queued again while it is running.
    pub fn allow_recurse(mut self, allow: bool) -> Self {
        self.allow_recurse = allow;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn order(&self) -> Option<u64> {
        self.order
    }

    pub fn is_pre(&self) -> bool {
        self.pre
    }

    pub fn allows_recurse(&self) -> bool {
        self.allow_recurse
    }

    pub(crate) fn sort_key(&self) -> u64 {
        self.order.unwrap_or(u64::MAX)
    }

    pub(crate) fn run(&self) {
        (self.run)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("pre", &self.pre)
            .field("allow_recurse", &self.allow_recurse)
            .finish()
    }
}
