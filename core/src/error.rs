//! Error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job {0} is already running")]
    AlreadyRunning(i64),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Secret backend error: {0}")]
    SecretError(String),

    #[error("Session timed out: {0}")]
    SessionTimeout(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Remote execution error: {0}")]
    RemoteExecutionError(String),

    #[error("Verification failed: {0}")]
    VerifyFailure(String),

    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Failure taxonomy surfaced to callers and recorded on outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Job, attempt or device missing; nothing was mutated
    NotFound,
    /// Unresolved secrets or an empty payload; the device was not touched
    ConfigError,
    /// Timeout, auth or transport failure while talking to the device
    DeviceError,
    /// The device changed but post-change checks failed
    VerifyFailure,
    /// Anything unexpected
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::ConfigError(_) | Error::SecretError(_) | Error::AlreadyRunning(_) => {
                ErrorKind::ConfigError
            }
            Error::SessionTimeout(_)
            | Error::AuthenticationError(_)
            | Error::RemoteExecutionError(_) => ErrorKind::DeviceError,
            Error::VerifyFailure(_) => ErrorKind::VerifyFailure,
            _ => ErrorKind::Internal,
        }
    }

    /// Result code a device operation reports for this error
    ///
    /// Timeouts and authentication failures are `2`, everything else `1`.
    pub fn device_exit_code(&self) -> i32 {
        match self {
            Error::SessionTimeout(_) | Error::AuthenticationError(_) => 2,
            _ => 1,
        }
    }
}

// Convert anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::HttpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::NotFound("job 1".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::ConfigError("CORE_SW1 unset".into()).kind(),
            ErrorKind::ConfigError
        );
        assert_eq!(
            Error::SessionTimeout("10.0.0.1".into()).kind(),
            ErrorKind::DeviceError
        );
        assert_eq!(
            Error::VerifyFailure("% Invalid input".into()).kind(),
            ErrorKind::VerifyFailure
        );
        assert_eq!(Error::Other("boom".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_device_exit_codes() {
        assert_eq!(Error::SessionTimeout("x".into()).device_exit_code(), 2);
        assert_eq!(Error::AuthenticationError("x".into()).device_exit_code(), 2);
        assert_eq!(Error::RemoteExecutionError("x".into()).device_exit_code(), 1);
    }
}
