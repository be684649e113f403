//! Lock pending jobs in Postgres and run them on a pool of in-process workers.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use envconfig::Envconfig;
use health::HealthRegistry;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use que_core::{JobRegistry, Locker, RetryPolicy};
use que_locker::cli::{Cli, LogLevel};
use que_locker::config::{load_env_files, resolve, Settings};
use que_locker::error::StartupError;
use que_locker::http;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            error.print().ok();
            return match error.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::FAILURE,
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("que-locker: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    load_env_files(&cli.files)?;
    let settings = Settings::init_from_env()?;

    setup_tracing(cli.log_level, cli.log_internals);

    let (locker_config, pool_config) = resolve(&cli, &settings)?;
    let pool = pool_config.connect().await?;

    let liveness = HealthRegistry::new("liveness");
    let locker_liveness = liveness.register(
        "locker",
        std::cmp::max(locker_config.wait_period * 20, Duration::from_secs(15)),
    );

    // Job handlers compiled into this binary get registered here, before the
    // locker starts.
    let registry = JobRegistry::new(pool.clone(), RetryPolicy::default());

    let locker = Locker::start(locker_config, pool, Arc::new(registry), locker_liveness).await?;

    let bind = settings.bind();
    info!("status server listening at {bind}");
    let router = http::app(liveness);
    tokio::spawn(async move {
        if let Err(error) = http::serve(router, &bind).await {
            error!(%error, "status server failed");
        }
    });

    wait_for_shutdown_signal().await;
    locker.stop_wait().await;

    Ok(())
}

fn setup_tracing(level: LogLevel, log_internals: bool) {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.to_filter().into())
        .from_env_lossy();
    if log_internals {
        filter = filter.add_directive("que_core=debug".parse().unwrap());
    }
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

async fn wait_for_shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = interrupt.recv() => info!("received SIGINT"),
    };

    info!("shutting down gracefully");
}
