use std::sync::{Arc, Mutex};
use std::time::Duration;

use health::{HealthHandle, HealthRegistry};
use que_core::{
    HandlerError, Job, JobRegistry, LockerConfig, NewJob, QueueConfig, QueueManager, RetryPolicy,
};
use sqlx::PgPool;

/// A locker config tuned for tests: one unrestricted worker, tight cadences.
#[allow(dead_code)]
pub fn fast_config() -> LockerConfig {
    LockerConfig {
        worker_count: 1,
        worker_priorities: vec![None],
        queues: vec![QueueConfig {
            name: "que_jobs".to_string(),
            poll_interval: Duration::from_millis(10),
        }],
        wait_period: Duration::from_millis(10),
        minimum_buffer_size: 2,
        maximum_buffer_size: 8,
    }
}

#[allow(dead_code)]
pub fn test_liveness() -> HealthHandle {
    HealthRegistry::new("liveness").register("locker", Duration::from_secs(60))
}

/// A registry with a single "probe" class whose handler records the priority
/// of every job it runs, in order.
#[allow(dead_code)]
pub fn recording_registry(pool: &PgPool) -> (JobRegistry, Arc<Mutex<Vec<i16>>>) {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut registry = JobRegistry::new(pool.clone(), RetryPolicy::default());
    let seen = order.clone();
    registry.register("probe", move |job| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(job.priority);
            Ok::<(), HandlerError>(())
        }
    });
    (registry, order)
}

#[allow(dead_code)]
pub async fn enqueue_probe(manager: &QueueManager, priority: i16) -> Job {
    manager
        .enqueue(&NewJob::new("probe").priority(priority))
        .await
        .expect("failed to enqueue job")
}

#[allow(dead_code)]
pub async fn count_jobs(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT count(*) FROM \"{table}\""))
        .fetch_one(pool)
        .await
        .expect("failed to count jobs")
}

#[allow(dead_code)]
pub async fn count_lockers(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT count(*) FROM que_lockers")
        .fetch_one(pool)
        .await
        .expect("failed to count lockers")
}

/// Poll `check` until it returns true or `deadline` passes.
#[allow(dead_code)]
pub async fn wait_until<F: Fn() -> bool>(what: &str, deadline: Duration, check: F) {
    let started = tokio::time::Instant::now();
    while !check() {
        if started.elapsed() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
