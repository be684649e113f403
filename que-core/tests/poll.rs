use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use que_core::ops::{jobs, meta, poll};
use que_core::{NewJob, QueueManager};
use sqlx::PgPool;

mod common;
use common::enqueue_probe;

#[sqlx::test(migrations = "./migrations")]
async fn poll_locks_in_key_order_without_duplicates(db: PgPool) {
    let manager = QueueManager::from_pool(db.clone());
    for priority in [50, 10, 30, 10, 100] {
        enqueue_probe(&manager, priority).await;
    }

    let mut session = db.acquire().await.unwrap();
    let keys = poll::poll_jobs(session.as_mut(), "que_jobs", &[], 10)
        .await
        .expect("poll failed");

    assert_eq!(keys.len(), 5);
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(meta::advisory_lock_count(&db).await.unwrap(), 5);

    for key in keys {
        assert!(poll::unlock_job(session.as_mut(), key.job_id).await.unwrap());
    }
    assert_eq!(meta::advisory_lock_count(&db).await.unwrap(), 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn poll_skips_excluded_job_ids(db: PgPool) {
    let manager = QueueManager::from_pool(db.clone());
    let mut inserted = Vec::new();
    for priority in [10, 20, 30, 40, 50] {
        inserted.push(enqueue_probe(&manager, priority).await);
    }
    let exclude = [inserted[0].job_id, inserted[3].job_id];

    let mut session = db.acquire().await.unwrap();
    let keys = poll::poll_jobs(session.as_mut(), "que_jobs", &exclude, 10)
        .await
        .expect("poll failed");

    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|key| !exclude.contains(&key.job_id)));
}

#[sqlx::test(migrations = "./migrations")]
async fn poll_honors_the_limit(db: PgPool) {
    let manager = QueueManager::from_pool(db.clone());
    for priority in [10, 20, 30, 40, 50] {
        enqueue_probe(&manager, priority).await;
    }

    let mut session = db.acquire().await.unwrap();
    let keys = poll::poll_jobs(session.as_mut(), "que_jobs", &[], 2)
        .await
        .expect("poll failed");

    assert_eq!(keys.len(), 2);
    assert_eq!(
        keys.iter().map(|key| key.priority).collect::<Vec<_>>(),
        vec![10, 20]
    );
    assert_eq!(meta::advisory_lock_count(&db).await.unwrap(), 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_sessions_lock_disjoint_jobs(db: PgPool) {
    let manager = QueueManager::from_pool(db.clone());
    for priority in [10, 20, 30, 40, 50] {
        enqueue_probe(&manager, priority).await;
    }

    // Both checkouts held at once, so they are distinct backend sessions.
    let mut session_a = db.acquire().await.unwrap();
    let mut session_b = db.acquire().await.unwrap();

    let first = poll::poll_jobs(session_a.as_mut(), "que_jobs", &[], 3)
        .await
        .expect("poll failed");
    let second = poll::poll_jobs(session_b.as_mut(), "que_jobs", &[], 10)
        .await
        .expect("poll failed");

    // The second poller sees the first poller's advisory locks and walks
    // past them to the remaining jobs.
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 2);
    assert!(first
        .iter()
        .all(|key| !second.iter().any(|other| other.job_id == key.job_id)));
}

#[sqlx::test(migrations = "./migrations")]
async fn poll_ignores_jobs_scheduled_in_the_future(db: PgPool) {
    let manager = QueueManager::from_pool(db.clone());
    manager
        .enqueue(&NewJob::new("probe").run_at(Utc::now() + ChronoDuration::hours(1)))
        .await
        .expect("failed to enqueue job");

    let mut session = db.acquire().await.unwrap();
    let keys = poll::poll_jobs(session.as_mut(), "que_jobs", &[], 10)
        .await
        .expect("poll failed");
    assert!(keys.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn get_destroy_and_set_error_round_trip(db: PgPool) {
    let manager = QueueManager::from_pool(db.clone());
    let job = manager
        .enqueue(
            &NewJob::new("probe")
                .priority(7)
                .args(serde_json::json!(["payload"])),
        )
        .await
        .expect("failed to enqueue job");

    let loaded = jobs::get_job(&db, "que_jobs", job.key())
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(loaded.job_class, "probe");
    assert_eq!(loaded.priority, 7);
    assert_eq!(loaded.args, serde_json::json!(["payload"]));
    assert_eq!(loaded.error_count, 0);
    assert!(loaded.last_error.is_none());

    jobs::set_error(
        &db,
        "que_jobs",
        job.key(),
        "handler exploded",
        Duration::from_secs(3600),
    )
    .await
    .expect("set_error failed");

    // The row moved to a future run_at under a new key, so polling skips it.
    let mut session = db.acquire().await.unwrap();
    let keys = poll::poll_jobs(session.as_mut(), "que_jobs", &[], 10)
        .await
        .expect("poll failed");
    assert!(keys.is_empty());

    let (error_count, last_error): (i32, Option<String>) =
        sqlx::query_as("SELECT error_count, last_error FROM que_jobs WHERE job_id = $1")
            .bind(job.job_id)
            .fetch_one(&db)
            .await
            .expect("failed to re-read job");
    assert_eq!(error_count, 1);
    assert_eq!(last_error.as_deref(), Some("handler exploded"));

    // Destroying under the stale key is a no-op, under the fresh one it
    // deletes the row.
    jobs::destroy_job(&db, "que_jobs", job.key())
        .await
        .expect("destroy failed");
    assert_eq!(common::count_jobs(&db, "que_jobs").await, 1);

    let fresh = jobs::get_job(&db, "que_jobs", job.key()).await.unwrap();
    assert!(fresh.is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn get_job_reports_a_destroyed_row_as_none(db: PgPool) {
    let manager = QueueManager::from_pool(db.clone());
    let job = enqueue_probe(&manager, 100).await;

    jobs::destroy_job(&db, "que_jobs", job.key())
        .await
        .expect("destroy failed");

    let missing = jobs::get_job(&db, "que_jobs", job.key())
        .await
        .expect("get failed");
    assert!(missing.is_none());
}
