use sqlx::PgPool;

use crate::config::{PoolConfig, DEFAULT_QUEUE};
use crate::error::QueueError;
use crate::ops::jobs;
use crate::types::{Job, NewJob};

/// The enqueue side of the system: applications hold one of these to insert
/// jobs, lockers elsewhere pick them up.
pub struct QueueManager {
    pool: PgPool,
}

impl QueueManager {
    pub async fn new(config: PoolConfig) -> Result<Self, QueueError> {
        let pool = config.connect().await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a job into the default queue, returning the stored row (with
    /// its assigned `job_id` and defaulted columns).
    pub async fn enqueue(&self, job: &NewJob) -> Result<Job, QueueError> {
        self.enqueue_to(DEFAULT_QUEUE, job).await
    }

    /// Insert a job into a specific queue's table.
    pub async fn enqueue_to(&self, queue: &str, job: &NewJob) -> Result<Job, QueueError> {
        jobs::insert_job(&self.pool, queue, job).await
    }
}
