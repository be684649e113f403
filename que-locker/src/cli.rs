use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Parser)]
#[command(
    name = "que-locker",
    about = "Work a queue of jobs stored in Postgres",
    version,
    disable_version_flag = true
)]
pub struct Cli {
    /// Print version information.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// Default seconds between polls, for queues without their own interval.
    #[arg(
        short = 'i',
        long = "poll-interval",
        value_name = "F",
        allow_negative_numbers = true,
        default_value_t = 5.0
    )]
    pub poll_interval: f64,

    /// Log level for stdout.
    #[arg(
        short = 'l',
        long = "log-level",
        value_name = "L",
        value_enum,
        default_value_t = LogLevel::Info
    )]
    pub log_level: LogLevel,

    /// Add a queue to work, optionally with its own poll interval (NAME=SECONDS).
    #[arg(
        short = 'q',
        long = "queue-name",
        value_name = "N[=I]",
        value_parser = parse_queue_spec
    )]
    pub queue_name: Vec<QueueSpec>,

    /// Number of workers in the pool.
    #[arg(
        short = 'w',
        long = "worker-count",
        value_name = "N",
        default_value_t = 6
    )]
    pub worker_count: usize,

    /// Postgres connection URL, taking precedence over DATABASE_URL.
    #[arg(long = "connection-url", value_name = "URL")]
    pub connection_url: Option<String>,

    /// Log the locker's internal poll and buffer activity.
    #[arg(long = "log-internals")]
    pub log_internals: bool,

    /// Buffer size never to exceed, counting jobs already at workers.
    #[arg(long = "maximum-buffer-size", value_name = "N", default_value_t = 8)]
    pub maximum_buffer_size: usize,

    /// Buffer size below which a refill poll is triggered.
    #[arg(long = "minimum-buffer-size", value_name = "N", default_value_t = 2)]
    pub minimum_buffer_size: usize,

    /// Milliseconds between result-queue drain passes.
    #[arg(
        long = "wait-period",
        value_name = "MS",
        allow_negative_numbers = true,
        default_value_t = 50.0
    )]
    pub wait_period: f64,

    /// Comma-separated priority ceilings, one per worker; workers beyond the
    /// list take jobs of any priority.
    #[arg(
        long = "worker-priorities",
        value_name = "LIST",
        value_delimiter = ',',
        default_values_t = [10, 30, 50]
    )]
    pub worker_priorities: Vec<i16>,

    /// Environment files to load before reading configuration. With none
    /// given, a ./.env is loaded if present.
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            // tracing has no fatal level; the closest is error
            LogLevel::Error | LogLevel::Fatal => LevelFilter::ERROR,
        }
    }
}

/// One `-q` occurrence: a queue name with an optional per-queue interval.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSpec {
    pub name: String,
    pub poll_interval: Option<f64>,
}

fn parse_queue_spec(raw: &str) -> Result<QueueSpec, String> {
    match raw.split_once('=') {
        None => Ok(QueueSpec {
            name: raw.to_owned(),
            poll_interval: None,
        }),
        Some((name, interval)) => {
            let interval = interval
                .parse::<f64>()
                .map_err(|_| format!("{interval:?} is not a valid interval in seconds"))?;
            Ok(QueueSpec {
                name: name.to_owned(),
                poll_interval: Some(interval),
            })
        }
    }
}
