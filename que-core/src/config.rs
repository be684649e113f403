use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::{pool::PoolOptions, PgPool};

use crate::error::{ConfigError, QueueError};

/// A pool config object, designed to be passable across API boundaries.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    pub db_url: String,
    pub max_connections: Option<u32>,         // Default to 10
    pub min_connections: Option<u32>,         // Default to 1
    pub acquire_timeout_seconds: Option<u64>, // Default to 30
    pub max_lifetime_seconds: Option<u64>,    // Default to 300
    pub idle_timeout_seconds: Option<u64>,    // Default to 60
}

impl PoolConfig {
    pub fn new(db_url: &str) -> Self {
        Self {
            db_url: db_url.to_owned(),
            max_connections: None,
            min_connections: None,
            acquire_timeout_seconds: None,
            max_lifetime_seconds: None,
            idle_timeout_seconds: None,
        }
    }

    pub async fn connect(&self) -> Result<PgPool, QueueError> {
        let builder = PoolOptions::new()
            .max_connections(self.max_connections.unwrap_or(10))
            .min_connections(self.min_connections.unwrap_or(1))
            .max_lifetime(Duration::from_secs(
                self.max_lifetime_seconds.unwrap_or(300),
            ))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds.unwrap_or(60)))
            .acquire_timeout(Duration::from_secs(
                self.acquire_timeout_seconds.unwrap_or(30),
            ));

        Ok(builder.connect(&self.db_url).await?)
    }
}

pub const DEFAULT_WORKER_COUNT: usize = 6;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_WAIT_PERIOD: Duration = Duration::from_millis(50);
pub const DEFAULT_MINIMUM_BUFFER_SIZE: usize = 2;
pub const DEFAULT_MAXIMUM_BUFFER_SIZE: usize = 8;
pub const DEFAULT_QUEUE: &str = "que_jobs";
pub const MINIMUM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One polled queue: a table with the `que_jobs` shape and its own poll
/// cadence.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct LockerConfig {
    /// Number of workers spawned.
    pub worker_count: usize,
    /// Per-worker priority ceilings; padded with `None` (run anything) or
    /// truncated to exactly `worker_count` entries.
    pub worker_priorities: Vec<Option<i16>>,
    /// Queues polled, in insertion order. Each queue keeps its own cadence
    /// clock.
    pub queues: Vec<QueueConfig>,
    /// Tick length of the poll loop: how long to sleep between result-queue
    /// drain passes.
    pub wait_period: Duration,
    /// Buffer size below which a refill poll is triggered.
    pub minimum_buffer_size: usize,
    /// Buffer size never to exceed, counting jobs already at workers.
    pub maximum_buffer_size: usize,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            worker_priorities: vec![Some(10), Some(30), Some(50)],
            queues: vec![QueueConfig {
                name: DEFAULT_QUEUE.to_owned(),
                poll_interval: DEFAULT_POLL_INTERVAL,
            }],
            wait_period: DEFAULT_WAIT_PERIOD,
            minimum_buffer_size: DEFAULT_MINIMUM_BUFFER_SIZE,
            maximum_buffer_size: DEFAULT_MAXIMUM_BUFFER_SIZE,
        }
    }
}

impl LockerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.minimum_buffer_size > self.maximum_buffer_size {
            return Err(ConfigError::BufferBounds {
                minimum: self.minimum_buffer_size,
                maximum: self.maximum_buffer_size,
            });
        }
        if self.queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }
        for queue in &self.queues {
            if !is_valid_queue_name(&queue.name) {
                return Err(ConfigError::InvalidQueueName(queue.name.clone()));
            }
            if queue.poll_interval < MINIMUM_POLL_INTERVAL {
                return Err(ConfigError::PollIntervalTooShort {
                    queue: queue.name.clone(),
                    interval: queue.poll_interval.as_secs_f64(),
                });
            }
        }
        Ok(())
    }

    /// The configured ceilings padded with `None` or truncated to exactly
    /// `worker_count` entries, in the stated order.
    pub fn resolved_priorities(&self) -> Vec<Option<i16>> {
        let mut priorities = self.worker_priorities.clone();
        priorities.resize(self.worker_count, None);
        priorities
    }
}

/// Queue names double as table identifiers and are interpolated into SQL, so
/// they are restricted to plain identifiers.
fn is_valid_queue_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
