//! Error types for vcmp-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Each variant maps to one recovery policy in the session state machine; see
//! [`Error::kind`].

use thiserror::Error;
use vcmp_common::events::ErrorKind;

/// Main error type for vcmp-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Voice connection lost or could not be joined (not retried, full reset)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Decode process failed to start or errored mid-stream (not retried, skip forward)
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Duration probe failed (recovered locally with the average-length fallback)
    #[error("Probe error: {0}")]
    Probe(String),

    /// Settings mutation rejected at the boundary, nothing applied
    #[error("Invalid setting: {0}")]
    SettingsValidation(String),

    /// Transient file could not be removed (logged only)
    #[error("Cleanup error: {0}")]
    ResourceCleanup(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session task is gone (registry shut down)
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Invalid request parameter
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl Error {
    /// Announcement category for user-visible reporting
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Transport(_) => Some(ErrorKind::Transport),
            Error::Pipeline(_) => Some(ErrorKind::Pipeline),
            Error::Probe(_) => Some(ErrorKind::Probe),
            Error::SettingsValidation(_) => Some(ErrorKind::SettingsValidation),
            Error::ResourceCleanup(_) => Some(ErrorKind::ResourceCleanup),
            _ => None,
        }
    }
}

impl From<vcmp_common::Error> for Error {
    fn from(err: vcmp_common::Error) -> Self {
        match err {
            vcmp_common::Error::Io(e) => Error::Io(e),
            vcmp_common::Error::Config(msg) => Error::Config(msg),
            vcmp_common::Error::InvalidInput(msg) => Error::BadRequest(msg),
        }
    }
}

/// Convenience Result type using vcmp-ap Error
pub type Result<T> = std::result::Result<T, Error>;
