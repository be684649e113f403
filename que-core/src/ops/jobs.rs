use std::time::Duration;

use crate::error::QueueError;
use crate::types::{Job, JobKey, NewJob};

use super::quoted;

/// Re-read a job row by its key. An empty result means the row was destroyed
/// between lock and load, which callers treat as success.
pub async fn get_job<'c, E>(executor: E, table: &str, key: JobKey) -> Result<Option<Job>, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let query = format!(
        r#"
SELECT priority, run_at, job_id, job_class, args, error_count, last_error
FROM {table}
WHERE priority = $1 AND run_at = $2 AND job_id = $3
        "#,
        table = quoted(table),
    );

    Ok(sqlx::query_as::<_, Job>(&query)
        .bind(key.priority)
        .bind(key.run_at)
        .bind(key.job_id)
        .fetch_optional(executor)
        .await?)
}

/// Delete a finished job row. Deleting an already-deleted row is a no-op.
pub async fn destroy_job<'c, E>(executor: E, table: &str, key: JobKey) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let query = format!(
        r#"
DELETE FROM {table}
WHERE priority = $1 AND run_at = $2 AND job_id = $3
        "#,
        table = quoted(table),
    );

    sqlx::query(&query)
        .bind(key.priority)
        .bind(key.run_at)
        .bind(key.job_id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Record a failed run: bump `error_count`, stash the error message, and push
/// `run_at` out by `retry_in`. The row keeps its identity under the old key
/// until the statement lands, which is why the key columns are the predicate.
pub async fn set_error<'c, E>(
    executor: E,
    table: &str,
    key: JobKey,
    error: &str,
    retry_in: Duration,
) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let query = format!(
        r#"
UPDATE {table}
SET error_count = error_count + 1,
    run_at = now() + $4 * '1 second'::interval,
    last_error = $5
WHERE priority = $1 AND run_at = $2 AND job_id = $3
        "#,
        table = quoted(table),
    );

    sqlx::query(&query)
        .bind(key.priority)
        .bind(key.run_at)
        .bind(key.job_id)
        .bind(retry_in.as_secs_f64())
        .bind(error)
        .execute(executor)
        .await?;

    Ok(())
}

/// Insert a job, with COALESCE supplying the table defaults for any field the
/// caller left unset, and return the row as stored.
pub async fn insert_job<'c, E>(executor: E, table: &str, job: &NewJob) -> Result<Job, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let query = format!(
        r#"
INSERT INTO {table} (priority, run_at, job_class, args)
VALUES (
    coalesce($1, 100::smallint),
    coalesce($2, now()),
    $3,
    coalesce($4, '[]'::jsonb)::json
)
RETURNING priority, run_at, job_id, job_class, args, error_count, last_error
        "#,
        table = quoted(table),
    );

    Ok(sqlx::query_as::<_, Job>(&query)
        .bind(job.priority)
        .bind(job.run_at)
        .bind(&job.job_class)
        .bind(job.args.as_ref())
        .fetch_one(executor)
        .await?)
}
