use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The key identifying a job row, and the unit the locker pipeline moves
/// around. Jobs sort ascending on `(priority, run_at, job_id)`; lower
/// priority values run earlier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct JobKey {
    pub priority: i16,
    pub run_at: DateTime<Utc>,
    pub job_id: i64,
}

/// A job whose advisory lock this process holds. Carries the queue (table)
/// the key was polled from, since keys alone are only unique per table.
///
/// Ordering is by key first, so a buffer of locked jobs across several queues
/// still pops in global `(priority, run_at, job_id)` order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LockedJob {
    pub key: JobKey,
    pub queue: Arc<str>,
}

impl LockedJob {
    pub fn new(queue: Arc<str>, key: JobKey) -> Self {
        Self { key, queue }
    }
}

/// A full job row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub priority: i16,
    pub run_at: DateTime<Utc>,
    pub job_id: i64,
    pub job_class: String,
    pub args: serde_json::Value,
    pub error_count: i32,
    pub last_error: Option<String>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey {
            priority: self.priority,
            run_at: self.run_at,
            job_id: self.job_id,
        }
    }
}

/// The chunk of data needed to enqueue a job. `None` fields fall back to the
/// table defaults (priority 100, `run_at` now, empty args).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub job_class: String,
    pub priority: Option<i16>,
    pub run_at: Option<DateTime<Utc>>,
    pub args: Option<serde_json::Value>,
}

impl NewJob {
    pub fn new(job_class: &str) -> Self {
        Self {
            job_class: job_class.to_owned(),
            priority: None,
            run_at: None,
            args: None,
        }
    }

    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn args(mut self, args: serde_json::Value) -> Self {
        self.args = Some(args);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn job_keys_sort_lexicographically() {
        let now = Utc::now();
        let a = JobKey {
            priority: 10,
            run_at: now,
            job_id: 5,
        };
        let b = JobKey {
            priority: 10,
            run_at: now,
            job_id: 6,
        };
        let c = JobKey {
            priority: 10,
            run_at: now + Duration::seconds(1),
            job_id: 1,
        };
        let d = JobKey {
            priority: 50,
            run_at: now - Duration::hours(1),
            job_id: 1,
        };

        // priority dominates run_at, run_at dominates job_id
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn locked_jobs_order_by_key_before_queue() {
        let now = Utc::now();
        let fast: Arc<str> = Arc::from("fast");
        let slow: Arc<str> = Arc::from("slow");

        let urgent = LockedJob::new(
            slow.clone(),
            JobKey {
                priority: 1,
                run_at: now,
                job_id: 9,
            },
        );
        let lazy = LockedJob::new(
            fast.clone(),
            JobKey {
                priority: 100,
                run_at: now,
                job_id: 1,
            },
        );

        assert!(urgent < lazy);
    }
}
