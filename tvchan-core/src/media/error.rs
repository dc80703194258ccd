use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;
use crate::remote::StoreError;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe exited with {status}: {stderr}")]
    Command { status: String, stderr: String },
    #[error("{tool} timed out after {timeout:?}")]
    Timeout {
        tool: &'static str,
        timeout: Duration,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("unparseable probe output: {0}")]
    Parse(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("no duration reported")]
    NoDuration,
    #[error("movie atom not found: {0}")]
    MissingMovieAtom(String),
    #[error("invalid media url for {rel_path}: {message}")]
    InvalidUrl { rel_path: String, message: String },
    #[error("all {attempts} probe strategies failed for {rel_path}")]
    Exhausted { rel_path: String, attempts: usize },
    #[error("invalid probe settings: {0}")]
    InvalidConfig(String),
    #[error("media store error: {0}")]
    Store(#[from] StoreError),
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Timeout { .. } | ProbeError::Network(_) => ErrorKind::TransientNetwork,
            ProbeError::Store(err) => err.kind(),
            ProbeError::InvalidUrl { .. } | ProbeError::InvalidConfig(_) => {
                ErrorKind::NotConfigured
            }
            ProbeError::Command { .. }
            | ProbeError::Spawn { .. }
            | ProbeError::Parse(_)
            | ProbeError::NoDuration
            | ProbeError::MissingMovieAtom(_)
            | ProbeError::Exhausted { .. } => ErrorKind::ProbeFailure,
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(error: reqwest::Error) -> Self {
        ProbeError::Network(error.to_string())
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(error: serde_json::Error) -> Self {
        ProbeError::Parse(error.to_string())
    }
}

pub type ProbeResult<T> = std::result::Result<T, ProbeError>;
