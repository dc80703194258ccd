use thiserror::Error;

use crate::error::ErrorKind;
use crate::remote::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("channel {channel_id} not found")]
    ChannelNotFound { channel_id: String },
    #[error("channel {channel_id} is inactive")]
    ChannelInactive { channel_id: String },
    #[error("channel {channel_id} has nothing scheduled at {seconds_of_day}s past midnight")]
    NotScheduled {
        channel_id: String,
        seconds_of_day: i64,
    },
    #[error("channel {channel_id} has no playable playlist items")]
    EmptyLoop { channel_id: String },
    #[error("channel {channel_id} has an invalid schedule: {reason}")]
    InvalidSchedule { channel_id: String, reason: String },
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::ChannelNotFound { .. } => ErrorKind::NotFound,
            ResolveError::ChannelInactive { .. }
            | ResolveError::NotScheduled { .. }
            | ResolveError::EmptyLoop { .. }
            | ResolveError::InvalidSchedule { .. } => ErrorKind::ScheduleInvalid,
        }
    }
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("schedule store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid channel id {0:?}")]
    InvalidChannelId(String),
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScheduleError::Resolve(err) => err.kind(),
            ScheduleError::Store(err) => err.kind(),
            ScheduleError::InvalidChannelId(_) => ErrorKind::ScheduleInvalid,
        }
    }
}

pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;
