use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use health::HealthHandle;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::JobBuffer;
use crate::config::LockerConfig;
use crate::error::{LockerError, QueueError};
use crate::metrics_consts::{
    BUFFER_DEPTH, HELD_LOCKS, JOBS_LOCKED, JOBS_UNLOCKED, POLLS, POLL_ERRORS, QUEUE_LABEL,
    UNLOCK_ERRORS,
};
use crate::ops::{lockers, meta, poll};
use crate::results::{result_queue, ResultReceiver};
use crate::types::LockedJob;
use crate::worker::{JobRunner, JobWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The coordinator owning the whole pipeline: the dedicated Postgres session
/// all advisory locks live on, the registry row announcing this process, the
/// buffer, the result queue, and the worker pool.
///
/// Constructed with [`Locker::start`]; runs until [`Locker::stop`] or
/// [`Locker::stop_wait`]. Both are idempotent, and once `stop_wait` returns
/// no advisory lock acquired by this process remains held.
pub struct Locker {
    shutdown: CancellationToken,
    state: watch::Receiver<LockerState>,
    control: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Locker {
    /// Check out a dedicated session from the pool and start the locker on it.
    pub async fn start(
        config: LockerConfig,
        pool: PgPool,
        runner: Arc<dyn JobRunner>,
        liveness: HealthHandle,
    ) -> Result<Self, LockerError> {
        let session = pool.acquire().await.map_err(QueueError::from)?;
        Self::start_with_session(config, pool, session, runner, liveness).await
    }

    /// Start the locker on a caller-supplied dedicated session. The pool is
    /// still used by the workers for their own sessions.
    pub async fn start_with_session(
        config: LockerConfig,
        pool: PgPool,
        mut session: PoolConnection<Postgres>,
        runner: Arc<dyn JobRunner>,
        liveness: HealthHandle,
    ) -> Result<Self, LockerError> {
        config.validate()?;

        let swept = lockers::clean_lockers(session.as_mut()).await?;
        if swept > 0 {
            info!(count = swept, "cleaned stale locker registrations");
        }

        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        lockers::register_locker(
            session.as_mut(),
            config.worker_count as i32,
            std::process::id() as i32,
            &hostname,
            false,
        )
        .await?;
        let backend_pid = meta::backend_pid(session.as_mut()).await?;

        let buffer = Arc::new(JobBuffer::new());
        let (result_tx, result_rx) = result_queue();

        let workers = config
            .resolved_priorities()
            .into_iter()
            .enumerate()
            .map(|(index, ceiling)| {
                let worker = JobWorker::new(
                    index,
                    ceiling,
                    buffer.clone(),
                    result_tx.clone(),
                    pool.clone(),
                    runner.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            backend_pid,
            workers = config.worker_count,
            queues = ?config.queues.iter().map(|q| q.name.as_str()).collect::<Vec<_>>(),
            "locker registered"
        );

        let shutdown = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(LockerState::Starting);

        let queues = config
            .queues
            .iter()
            .map(|queue| QueueState {
                name: Arc::from(queue.name.as_str()),
                poll_interval: queue.poll_interval,
                last_poll: None,
            })
            .collect();

        let control = LockerLoop {
            config,
            session,
            buffer,
            results: result_rx,
            workers,
            queues,
            held: HashSet::new(),
            unlock_retries: VecDeque::new(),
            shutdown: shutdown.clone(),
            state: state_tx,
            liveness,
        };
        let control = tokio::spawn(control.run());

        Ok(Self {
            shutdown,
            state: state_rx,
            control: tokio::sync::Mutex::new(Some(control)),
        })
    }

    pub fn state(&self) -> LockerState {
        *self.state.borrow()
    }

    /// Ask the locker to shut down and return immediately. The poll loop
    /// notices within one `wait_period`.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Shut down and wait for the full sequence: workers drained, every
    /// advisory lock released, registry row deleted, dedicated session
    /// returned. Safe to call any number of times, from any task.
    pub async fn stop_wait(&self) {
        self.shutdown.cancel();
        let control = self.control.lock().await.take();
        match control {
            Some(control) => {
                if let Err(error) = control.await {
                    error!(%error, "locker control task panicked");
                }
            }
            None => {
                // Another caller owns the join; wait for the state instead.
                let mut state = self.state.clone();
                while *state.borrow_and_update() != LockerState::Stopped {
                    if state.changed().await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

struct QueueState {
    name: Arc<str>,
    poll_interval: Duration,
    last_poll: Option<Instant>,
}

/// The control task. Owns the dedicated session; nothing else ever runs SQL
/// on it.
struct LockerLoop {
    config: LockerConfig,
    session: PoolConnection<Postgres>,
    buffer: Arc<JobBuffer>,
    results: ResultReceiver,
    workers: Vec<JoinHandle<()>>,
    queues: Vec<QueueState>,
    /// Job ids whose advisory locks this session holds. Grown when a poll
    /// returns keys, shrunk on confirmed unlock; always equals
    /// buffer + result queue + in-flight at workers.
    held: HashSet<i64>,
    /// Jobs whose unlock failed transiently; they stay in `held` (and in the
    /// poll exclusion set) until Postgres confirms the release.
    unlock_retries: VecDeque<LockedJob>,
    shutdown: CancellationToken,
    state: watch::Sender<LockerState>,
    liveness: HealthHandle,
}

impl LockerLoop {
    async fn run(mut self) {
        self.state.send_replace(LockerState::Running);

        loop {
            self.drain_results().await;
            if self.shutdown.is_cancelled() {
                break;
            }
            self.refill().await;
            self.liveness.report_healthy();
            metrics::gauge!(BUFFER_DEPTH).set(self.buffer.len() as f64);
            metrics::gauge!(HELD_LOCKS).set(self.held.len() as f64);

            tokio::select! {
                _ = tokio::time::sleep(self.config.wait_period) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.wind_down().await;
    }

    /// Release the lock of every job the workers have finished since the
    /// last tick, retrying any release that failed before.
    async fn drain_results(&mut self) {
        let retries: Vec<LockedJob> = self.unlock_retries.drain(..).collect();
        for job in retries {
            self.release(job).await;
        }
        while let Some(job) = self.results.try_pop() {
            self.release(job).await;
        }
    }

    async fn release(&mut self, job: LockedJob) {
        match poll::unlock_job(self.session.as_mut(), job.key.job_id).await {
            Ok(was_held) => {
                if !was_held {
                    warn!(
                        job_id = job.key.job_id,
                        "advisory lock was not held at release"
                    );
                }
                self.held.remove(&job.key.job_id);
                metrics::counter!(JOBS_UNLOCKED).increment(1);
            }
            Err(error) => {
                metrics::counter!(UNLOCK_ERRORS).increment(1);
                error!(
                    job_id = job.key.job_id,
                    %error,
                    "failed to release advisory lock, will retry"
                );
                self.unlock_retries.push_back(job);
            }
        }
    }

    /// Top the buffer up when it runs low. The low-watermark decision is
    /// taken once per tick; every queue whose cadence has elapsed then polls,
    /// regardless of what an earlier queue contributed this tick.
    async fn refill(&mut self) {
        if self.buffer.len() >= self.config.minimum_buffer_size {
            return;
        }
        for ix in 0..self.queues.len() {
            let queue = &self.queues[ix];
            let due = queue
                .last_poll
                .is_none_or(|at| at.elapsed() >= queue.poll_interval);
            if !due {
                continue;
            }
            // The pipeline (buffer + result queue + in-flight) never exceeds
            // the high watermark, counting every lock we hold.
            let capacity = self
                .config
                .maximum_buffer_size
                .saturating_sub(self.held.len());
            if capacity == 0 {
                break;
            }
            self.poll_queue(ix, capacity as i64).await;
        }
    }

    async fn poll_queue(&mut self, ix: usize, limit: i64) {
        let name = self.queues[ix].name.clone();
        let exclude: Vec<i64> = self.held.iter().copied().collect();
        self.queues[ix].last_poll = Some(Instant::now());

        let labels = [(QUEUE_LABEL, name.to_string())];
        metrics::counter!(POLLS, &labels).increment(1);

        match poll::poll_jobs(self.session.as_mut(), &name, &exclude, limit).await {
            Ok(keys) => {
                if keys.is_empty() {
                    return;
                }
                metrics::counter!(JOBS_LOCKED, &labels).increment(keys.len() as u64);
                debug!(queue = %name, count = keys.len(), "locked jobs");
                self.held.extend(keys.iter().map(|key| key.job_id));
                let jobs = keys
                    .into_iter()
                    .map(|key| LockedJob::new(name.clone(), key))
                    .collect();
                self.buffer.push(jobs);
            }
            Err(error) => {
                metrics::counter!(POLL_ERRORS, &labels).increment(1);
                error!(queue = %name, %error, "poll failed");
            }
        }
    }

    /// The ordered shutdown sequence. Errors here are logged and the
    /// remaining steps still run.
    async fn wind_down(mut self) {
        self.state.send_replace(LockerState::Stopping);
        info!("locker stopping");

        // Wake blocked workers with the stop sentinel and take back every
        // job that never reached one.
        self.buffer.stop();
        let harvested = self.buffer.clear();

        for worker in self.workers.drain(..) {
            if let Err(error) = worker.await {
                error!(%error, "worker task panicked");
            }
        }

        // With the workers gone the result queue is complete: release the
        // finished jobs first, then the harvested ones that never ran.
        while let Some(job) = self.results.try_pop() {
            self.release(job).await;
        }
        for job in harvested {
            self.release(job).await;
        }
        let retries: Vec<LockedJob> = self.unlock_retries.drain(..).collect();
        for job in retries {
            self.release(job).await;
        }

        if let Err(error) = lockers::deregister_locker(self.session.as_mut()).await {
            error!(%error, "failed to deregister locker");
        }

        let session = self.session;
        if self.held.is_empty() {
            drop(session);
        } else {
            // Advisory locks are session-scoped: a session with stuck locks
            // must not go back into the pool. Closing it makes Postgres
            // release them.
            error!(
                count = self.held.len(),
                "advisory locks still held, closing dedicated session"
            );
            if let Err(error) = session.detach().close().await {
                error!(%error, "failed to close dedicated session");
            }
        }

        self.state.send_replace(LockerState::Stopped);
        info!("locker stopped");
    }
}
