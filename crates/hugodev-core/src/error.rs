//! Error types for hugodev-core

use hugodev_provider::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] hugodev_config::ConfigError),

    #[error(transparent)]
    Provider(#[from] hugodev_provider::ProviderError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Config(_) | Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidState(_) | Self::Watcher(_) | Self::Io(_) => ErrorKind::Daemon,
        }
    }
}

impl From<notify::Error> for CoreError {
    fn from(e: notify::Error) -> Self {
        Self::Watcher(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
