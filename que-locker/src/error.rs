use std::path::PathBuf;

use que_core::{ConfigError, LockerError, QueueError};
use thiserror::Error;

/// Anything that can abort startup. These all exit with status 1; once the
/// locker is running, errors are logged and recovered instead.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("could not load {}: {error}", file.display())]
    LoadFile { file: PathBuf, error: dotenvy::Error },
    #[error("no environment files given and no .env found")]
    MissingEnvFile,
    #[error("invalid environment configuration: {0:?}")]
    Env(#[from] envconfig::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Locker(#[from] LockerError),
}
