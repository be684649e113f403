use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error};

use crate::buffer::JobBuffer;
use crate::error::RunError;
use crate::metrics_consts::{JOBS_RUN, JOBS_VANISHED, JOB_RUN_TIME, QUEUE_LABEL, RUN_ERRORS};
use crate::ops::jobs;
use crate::results::ResultSender;
use crate::types::{Job, LockedJob};

/// The seam between the locking pipeline and whatever actually executes jobs.
///
/// A runner owns the whole outcome of a run: destroying the row on success,
/// recording the failure and rescheduling on error. By the time `run`
/// returns, the row no longer needs its advisory lock, whatever happened.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, queue: &str, job: Job) -> Result<(), RunError>;
}

/// One member of the locker's worker pool.
///
/// Pops locked jobs within its priority ceiling, loads each row on a session
/// of its own (never the locker's dedicated one), hands it to the runner, and
/// always reports the handle back so the lock gets released. Exits when the
/// buffer pop returns the stop sentinel.
pub(crate) struct JobWorker {
    index: usize,
    ceiling: Option<i16>,
    buffer: Arc<JobBuffer>,
    results: ResultSender,
    pool: PgPool,
    runner: Arc<dyn JobRunner>,
}

impl JobWorker {
    pub(crate) fn new(
        index: usize,
        ceiling: Option<i16>,
        buffer: Arc<JobBuffer>,
        results: ResultSender,
        pool: PgPool,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        Self {
            index,
            ceiling,
            buffer,
            results,
            pool,
            runner,
        }
    }

    pub(crate) async fn run(self) {
        debug!(worker = self.index, ceiling = ?self.ceiling, "worker started");
        while let Some(job) = self.buffer.pop(self.ceiling).await {
            self.process(&job).await;
            self.results.push(job);
        }
        debug!(worker = self.index, "worker stopped");
    }

    /// Run one job. Failures are logged, never propagated: success, handler
    /// failure and vanished-row all end with the handle going back for
    /// unlock, and the row itself already records whatever retry state the
    /// runner gave it.
    async fn process(&self, locked: &LockedJob) {
        let labels = [(QUEUE_LABEL, locked.queue.to_string())];

        match jobs::get_job(&self.pool, &locked.queue, locked.key).await {
            Ok(Some(job)) => {
                let started = tokio::time::Instant::now();
                let job_id = job.job_id;
                if let Err(error) = self.runner.run(&locked.queue, job).await {
                    metrics::counter!(RUN_ERRORS, &labels).increment(1);
                    error!(
                        worker = self.index,
                        job_id,
                        %error,
                        "job run failed"
                    );
                }
                metrics::counter!(JOBS_RUN, &labels).increment(1);
                metrics::histogram!(JOB_RUN_TIME, &labels)
                    .record(started.elapsed().as_millis() as f64);
            }
            Ok(None) => {
                // Destroyed between lock and load; releasing the lock is all
                // that is left to do.
                metrics::counter!(JOBS_VANISHED, &labels).increment(1);
                debug!(
                    worker = self.index,
                    job_id = locked.key.job_id,
                    "job row gone before load"
                );
            }
            Err(error) => {
                error!(
                    worker = self.index,
                    job_id = locked.key.job_id,
                    %error,
                    "failed to load job"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use sqlx::PgPool;

    use super::*;
    use crate::results::result_queue;
    use crate::types::JobKey;

    struct RecordingRunner {
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run(&self, _queue: &str, job: Job) -> Result<(), RunError> {
            self.seen.lock().unwrap().push(job.job_id);
            Ok(())
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn vanished_job_is_reported_without_running(db: PgPool) {
        let buffer = Arc::new(JobBuffer::new());
        let (tx, mut rx) = result_queue();
        let runner = Arc::new(RecordingRunner {
            seen: Mutex::new(Vec::new()),
        });

        // A key for a row that was never inserted: the lock-then-deleted case.
        let ghost = LockedJob::new(
            Arc::from("que_jobs"),
            JobKey {
                priority: 100,
                run_at: Utc::now(),
                job_id: 12345,
            },
        );
        buffer.push(vec![ghost.clone()]);

        let worker = JobWorker::new(0, None, buffer.clone(), tx, db, runner.clone());
        let handle = tokio::spawn(worker.run());

        // The handle still comes back for unlocking, and the runner was
        // never invoked.
        let returned = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Some(job) = rx.try_pop() {
                    return job;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker never returned the handle");
        assert_eq!(returned, ghost);
        assert!(runner.seen.lock().unwrap().is_empty());

        buffer.stop();
        handle.await.expect("worker panicked");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn worker_exits_on_the_stop_sentinel(db: PgPool) {
        let buffer = Arc::new(JobBuffer::new());
        let (tx, _rx) = result_queue();
        let runner = Arc::new(RecordingRunner {
            seen: Mutex::new(Vec::new()),
        });

        let worker = JobWorker::new(0, Some(10), buffer.clone(), tx, db, runner);
        let handle = tokio::spawn(worker.run());

        buffer.stop();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("worker did not exit after stop")
            .expect("worker panicked");
    }
}
