//! A job queue on plain Postgres tables, coordinated with session-level
//! advisory locks.
//!
//! The [`Locker`] polls one or more job tables, locks pending rows on a
//! dedicated session, and feeds them through a bounded in-memory buffer to a
//! pool of priority-stratified workers. Completed handles flow back through a
//! result queue and their locks are released on the same session. The
//! database stays the single source of truth: lockers on any number of hosts
//! can share a table, and a crashed process leaks nothing because Postgres
//! drops its session's advisory locks.

pub mod ops;

// We do this pattern (privately use a module, then re-export parts of it) so
// we can futz around with the internals without breaking the public API.

mod types;
pub use types::Job;
pub use types::JobKey;
pub use types::LockedJob;
pub use types::NewJob;

mod error;
pub use error::ConfigError;
pub use error::LockerError;
pub use error::QueueError;
pub use error::RunError;

mod config;
pub use config::LockerConfig;
pub use config::PoolConfig;
pub use config::QueueConfig;
pub use config::DEFAULT_QUEUE;

mod buffer;
pub use buffer::JobBuffer;

mod results;
pub use results::result_queue;
pub use results::ResultReceiver;
pub use results::ResultSender;

mod worker;
pub use worker::JobRunner;

mod runtime;
pub use runtime::HandlerError;
pub use runtime::JobRegistry;
pub use runtime::RetryPolicy;
pub use runtime::RetryPolicyBuilder;

mod manager;
pub use manager::QueueManager;

mod locker;
pub use locker::Locker;
pub use locker::LockerState;

pub mod metrics_consts;
