use crate::error::QueueError;
use crate::types::JobKey;

use super::quoted;

/// Lock up to `limit` pending jobs on the executor's session and return their
/// keys in `(priority, run_at, job_id)` order.
///
/// The recursive CTE walks the table in key order and attempts
/// `pg_try_advisory_lock` on one candidate per recursion step, stepping to
/// the next key-ordered candidate only when needed. A flat
/// `SELECT pg_try_advisory_lock(job_id) FROM ...` would lock every row the
/// scan visits, not just the ones returned.
///
/// `exclude` is the set of job ids this process already holds; the query
/// never considers them, so a job cannot enter the pipeline twice.
///
/// Advisory locks are session-scoped: this must run on the locker's
/// dedicated session, never on a transient pool checkout.
pub async fn poll_jobs<'c, E>(
    executor: E,
    table: &str,
    exclude: &[i64],
    limit: i64,
) -> Result<Vec<JobKey>, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let query = format!(
        r#"
WITH RECURSIVE locked_jobs AS (
    SELECT (j).*, pg_try_advisory_lock((j).job_id) AS locked
    FROM (
        SELECT j
        FROM {table} AS j
        WHERE run_at <= now()
          AND NOT job_id = ANY($1)
        ORDER BY priority, run_at, job_id
        LIMIT 1
    ) AS t1
    UNION ALL (
        SELECT (j).*, pg_try_advisory_lock((j).job_id) AS locked
        FROM (
            SELECT (
                SELECT j
                FROM {table} AS j
                WHERE run_at <= now()
                  AND NOT job_id = ANY($1)
                  AND (priority, run_at, job_id) >
                      (locked_jobs.priority, locked_jobs.run_at, locked_jobs.job_id)
                ORDER BY priority, run_at, job_id
                LIMIT 1
            ) AS j
            FROM locked_jobs
            WHERE locked_jobs.job_id IS NOT NULL
            LIMIT 1
        ) AS t1
    )
)
SELECT priority, run_at, job_id
FROM locked_jobs
WHERE locked
LIMIT $2
        "#,
        table = quoted(table),
    );

    Ok(sqlx::query_as::<_, JobKey>(&query)
        .bind(exclude)
        .bind(limit)
        .fetch_all(executor)
        .await?)
}

/// Release one advisory lock on the executor's session. Returns whether the
/// session actually held the lock; `false` indicates a bookkeeping bug, not
/// an error.
pub async fn unlock_job<'c, E>(executor: E, job_id: i64) -> Result<bool, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
        .bind(job_id)
        .fetch_one(executor)
        .await?)
}
