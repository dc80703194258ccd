use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store not configured: {0}")]
    NotConfigured(String),
    #[error("document {name} not found")]
    NotFound { name: String },
    #[error("{operation} of {name} failed: {message}")]
    Transient {
        operation: &'static str,
        name: String,
        message: String,
    },
    #[error("{operation} of {name} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        name: String,
        timeout: Duration,
    },
    #[error("document {name} is corrupted: {message}")]
    Corrupted { name: String, message: String },
    #[error("document {name} failed to serialize: {message}")]
    Serialization { name: String, message: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("command `{command}` exited with {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("invalid document name {0:?}")]
    InvalidName(String),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotConfigured(_) => ErrorKind::NotConfigured,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Transient { .. }
            | StoreError::Timeout { .. }
            | StoreError::CommandFailure { .. } => ErrorKind::TransientNetwork,
            StoreError::Corrupted { .. } => ErrorKind::CorruptedState,
            StoreError::Serialization { .. }
            | StoreError::Io { .. }
            | StoreError::InvalidName(_)
            | StoreError::Json(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            source,
            path: path.into(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
