use crate::error::QueueError;

/// The backend pid of the executor's session, as it appears in
/// `que_lockers.pid` and `pg_locks.pid`.
pub async fn backend_pid<'c, E>(executor: E) -> Result<i32, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_scalar("SELECT pg_backend_pid()")
        .fetch_one(executor)
        .await?)
}

/// Count advisory locks currently held against this database, across all
/// sessions. After a clean locker shutdown this is zero.
pub async fn advisory_lock_count<'c, E>(executor: E) -> Result<i64, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_scalar(
        r#"
SELECT count(*)
FROM pg_locks
WHERE locktype = 'advisory'
  AND database = (SELECT oid FROM pg_database WHERE datname = current_database())
        "#,
    )
    .fetch_one(executor)
    .await?)
}
