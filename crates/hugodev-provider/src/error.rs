//! Error types for the daemon and registry capabilities

use thiserror::Error;

/// Closed set of failure kinds callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The daemon or registry could not be reached
    Connection,
    /// The registry refused our credentials or challenge
    Auth,
    /// Image, tag, manifest or container does not exist
    NotFound,
    /// Operator input or a reference is malformed
    Validation,
    /// The daemon or registry rejected the request
    Daemon,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Auth => write!(f, "auth"),
            Self::NotFound => write!(f, "not found"),
            Self::Validation => write!(f, "validation"),
            Self::Daemon => write!(f, "daemon"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to connect: {0}")]
    ConnectionError(String),

    #[error("Registry authorization failed: {0}")]
    AuthError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Container daemon error: {0}")]
    DaemonError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionError(_) => ErrorKind::Connection,
            Self::AuthError(_) => ErrorKind::Auth,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::DaemonError(_) | Self::RegistryError(_) | Self::IoError(_) => ErrorKind::Daemon,
        }
    }
}

impl From<bollard::errors::Error> for ProviderError {
    fn from(e: bollard::errors::Error) -> Self {
        use bollard::errors::Error;
        match e {
            Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound(message),
            Error::HyperResponseError { .. }
            | Error::RequestTimeoutError
            | Error::IOError { .. } => Self::ConnectionError(e.to_string()),
            other => Self::DaemonError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::ConnectionError(e.to_string())
        } else {
            Self::RegistryError(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
