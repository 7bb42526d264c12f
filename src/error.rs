//! Error types shared by the scan core and the HTTP layer.

use thiserror::Error;

use crate::types::ReportId;

/// Result alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("a scan is already in progress")]
    AlreadyRunning,

    #[error("no scan is in progress")]
    NotRunning,

    /// The scan engine failed or the target could not be scanned.
    #[error("{0}")]
    Engine(String),

    #[error("report not found: {0}")]
    NotFound(String),

    #[error("report id already exists: {0}")]
    DuplicateId(ReportId),

    #[error("scan worker is not available")]
    WorkerUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Error::Engine(msg.into())
    }
}
