//! The default job runtime: a registry mapping job classes to handlers,
//! with retry backoff recorded on the row for failed runs.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::PgPool;
use tracing::warn;

use crate::error::RunError;
use crate::ops::jobs;
use crate::types::Job;
use crate::worker::JobRunner;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
type Handler = Box<dyn Fn(Job) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// The retry policy determining how far `run_at` is pushed out when a run
/// fails: `initial_interval * backoff_coefficient ^ (attempt - 1)`, capped by
/// `maximum_interval`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub backoff_coefficient: u32,
    pub initial_interval: Duration,
    pub maximum_interval: Option<Duration>,
}

impl RetryPolicy {
    /// Initialize a `RetryPolicyBuilder`.
    pub fn build(backoff_coefficient: u32, initial_interval: Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(backoff_coefficient, initial_interval)
    }

    /// Determine the interval for retrying at a given attempt number.
    pub fn retry_interval(&self, attempt: u32) -> Duration {
        let candidate_interval =
            self.initial_interval * self.backoff_coefficient.pow(attempt.saturating_sub(1));

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::default().provide()
    }
}

/// Builder pattern struct to provide a `RetryPolicy`.
pub struct RetryPolicyBuilder {
    pub backoff_coefficient: u32,
    pub initial_interval: Duration,
    pub maximum_interval: Option<Duration>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: Duration::from_secs(1),
            maximum_interval: None,
        }
    }
}

impl RetryPolicyBuilder {
    pub fn new(backoff_coefficient: u32, initial_interval: Duration) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            ..RetryPolicyBuilder::default()
        }
    }

    pub fn maximum_interval(mut self, interval: Duration) -> RetryPolicyBuilder {
        self.maximum_interval = Some(interval);
        self
    }

    /// Provide a `RetryPolicy` according to build parameters provided thus far.
    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_coefficient: self.backoff_coefficient,
            initial_interval: self.initial_interval,
            maximum_interval: self.maximum_interval,
        }
    }
}

/// A `JobRunner` dispatching on `job_class` through handlers registered at
/// process init.
///
/// Outcome policy: a handler returning `Ok` destroys the row; a handler
/// error (or an unregistered class) bumps `error_count`, stores the message
/// in `last_error` and reschedules `run_at` per the retry policy. Both paths
/// use the registry's own pool sessions, never the locker's dedicated one.
pub struct JobRegistry {
    pool: PgPool,
    retry_policy: RetryPolicy,
    handlers: HashMap<String, Handler>,
}

impl JobRegistry {
    pub fn new(pool: PgPool, retry_policy: RetryPolicy) -> Self {
        Self {
            pool,
            retry_policy,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job class. Re-registering a class replaces
    /// the previous handler.
    pub fn register<F, Fut>(&mut self, job_class: &str, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handlers.insert(
            job_class.to_owned(),
            Box::new(move |job| Box::pin(handler(job))),
        );
    }

    async fn record_failure(&self, queue: &str, job: &Job, message: &str) -> Result<(), RunError> {
        let attempt = (job.error_count + 1).max(1) as u32;
        let retry_in = self.retry_policy.retry_interval(attempt);
        warn!(
            job_id = job.job_id,
            job_class = job.job_class,
            attempt,
            retry_in_seconds = retry_in.as_secs_f64(),
            "job failed, rescheduling"
        );
        jobs::set_error(&self.pool, queue, job.key(), message, retry_in).await?;
        Ok(())
    }
}

#[async_trait]
impl JobRunner for JobRegistry {
    async fn run(&self, queue: &str, job: Job) -> Result<(), RunError> {
        match self.handlers.get(&job.job_class) {
            Some(handler) => match handler(job.clone()).await {
                Ok(()) => {
                    jobs::destroy_job(&self.pool, queue, job.key()).await?;
                    Ok(())
                }
                Err(error) => self.record_failure(queue, &job, &error.to_string()).await,
            },
            None => {
                let message = format!("unknown job class: {}", job.job_class);
                self.record_failure(queue, &job, &message).await
            }
        }
    }
}
