use crate::error::QueueError;

/// Garbage-collect registry rows left behind by crashed processes: any row
/// whose backend pid is no longer in `pg_stat_activity`, plus any previous
/// row for this session. Run before registering.
pub async fn clean_lockers<'c, E>(executor: E) -> Result<u64, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let result = sqlx::query(
        r#"
DELETE FROM que_lockers
WHERE pid = pg_backend_pid()
   OR pid NOT IN (SELECT pid FROM pg_stat_activity)
        "#,
    )
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Announce this locker in `que_lockers`, keyed by the session's backend pid.
/// Must run on the dedicated session so the row dies with the right backend.
pub async fn register_locker<'c, E>(
    executor: E,
    worker_count: i32,
    os_pid: i32,
    hostname: &str,
    listening: bool,
) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
INSERT INTO que_lockers (pid, worker_count, os_pid, hostname, listening)
VALUES (pg_backend_pid(), $1, $2, $3, $4)
        "#,
    )
    .bind(worker_count)
    .bind(os_pid)
    .bind(hostname)
    .bind(listening)
    .execute(executor)
    .await?;

    Ok(())
}

/// Remove this session's registry row during shutdown.
pub async fn deregister_locker<'c, E>(executor: E) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query("DELETE FROM que_lockers WHERE pid = pg_backend_pid()")
        .execute(executor)
        .await?;

    Ok(())
}
