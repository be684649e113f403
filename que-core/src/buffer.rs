use std::collections::BTreeSet;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::types::LockedJob;

/// The in-memory stretch of the pipeline: locked jobs waiting for a worker,
/// kept in `(priority, run_at, job_id)` order.
///
/// Pushing never blocks and never enforces a bound; the locker caps growth by
/// sizing its polls. Popping blocks until an eligible job or a `stop` call
/// arrives. State lives under a sync mutex that is never held across an await
/// point; blocked pops park on a `Notify` and re-check on every wake-up.
pub struct JobBuffer {
    inner: Mutex<Inner>,
    notify: Notify,
}

struct Inner {
    jobs: BTreeSet<LockedJob>,
    stopped: bool,
}

impl JobBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: BTreeSet::new(),
                stopped: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Insert a batch of locked jobs in sorted position and wake all blocked
    /// pops. Pushing to a stopped buffer is a bug; the jobs are still
    /// recorded so a final `clear` can hand them back for unlocking.
    pub fn push(&self, jobs: Vec<LockedJob>) {
        {
            let mut inner = self.inner.lock().unwrap();
            for job in jobs {
                inner.jobs.insert(job);
            }
        }
        self.notify.notify_waiters();
    }

    /// Remove and return the smallest job whose priority is within `ceiling`
    /// (any job when `ceiling` is `None`), blocking until one exists.
    /// Returns `None` once the buffer has been stopped: the sentinel that
    /// makes a worker loop exit.
    ///
    /// The set is priority-major, so only the minimum element can ever be
    /// eligible: if its priority exceeds the ceiling, so does every other.
    pub async fn pop(&self, ceiling: Option<i16>) -> Option<LockedJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wake-ups before inspecting state, so a push that
            // lands between the unlock below and the await cannot be missed.
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.stopped {
                    return None;
                }
                let eligible = inner
                    .jobs
                    .first()
                    .is_some_and(|job| ceiling.is_none_or(|max| job.key.priority <= max));
                if eligible {
                    return inner.jobs.pop_first();
                }
            }
            notified.await;
        }
    }

    /// Close the buffer. Blocked and future pops return the stop sentinel;
    /// jobs still inside are left for `clear` to harvest.
    pub fn stop(&self) {
        self.inner.lock().unwrap().stopped = true;
        self.notify.notify_waiters();
    }

    /// Drain every remaining job, in order. Shutdown uses this to find the
    /// locks that still need releasing.
    pub fn clear(&self) -> Vec<LockedJob> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.jobs).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<LockedJob> {
        self.inner.lock().unwrap().jobs.iter().cloned().collect()
    }
}

impl Default for JobBuffer {
    fn default() -> Self {
        Self::new()
    }
}
