use thiserror::Error;

/// Errors from queue and lock operations against Postgres.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Errors from validating locker or queue configuration. All of these are
/// fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("poll interval for queue {queue} is {interval}s, minimum is 0.01s")]
    PollIntervalTooShort { queue: String, interval: f64 },
    #[error("minimum buffer size {minimum} exceeds maximum buffer size {maximum}")]
    BufferBounds { minimum: usize, maximum: usize },
    #[error("{0:?} is not a valid queue name")]
    InvalidQueueName(String),
    #[error("wait period must be a positive number of milliseconds, got {0}")]
    InvalidWaitPeriod(f64),
    #[error("no queues configured")]
    NoQueues,
    #[error("no database connection URL configured")]
    MissingConnection,
}

/// Errors surfaced by `Locker::start`. Anything after startup is logged and
/// recovered instead.
#[derive(Error, Debug)]
pub enum LockerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<sqlx::Error> for LockerError {
    fn from(error: sqlx::Error) -> Self {
        LockerError::Queue(QueueError::Sqlx(error))
    }
}

/// Errors a `JobRunner` may surface to the worker loop. The worker logs these
/// and releases the job's lock regardless; recording the failure on the row
/// is the runner's responsibility.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("could not persist job outcome: {0}")]
    Queue(#[from] QueueError),
    #[error("job handler failed: {0}")]
    Handler(Box<dyn std::error::Error + Send + Sync>),
}
