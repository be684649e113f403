// Metric names
pub const JOBS_LOCKED: &str = "que_jobs_locked";
pub const JOBS_UNLOCKED: &str = "que_jobs_unlocked";
pub const JOBS_RUN: &str = "que_jobs_run";
pub const JOB_RUN_TIME: &str = "que_job_run_ms";
pub const JOBS_VANISHED: &str = "que_jobs_vanished";
pub const RUN_ERRORS: &str = "que_job_run_errors";
pub const POLLS: &str = "que_polls";
pub const POLL_ERRORS: &str = "que_poll_errors";
pub const UNLOCK_ERRORS: &str = "que_unlock_errors";
pub const BUFFER_DEPTH: &str = "que_buffer_depth";
pub const HELD_LOCKS: &str = "que_held_advisory_locks";

// Label keys
pub const QUEUE_LABEL: &str = "queue";
