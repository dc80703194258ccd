use chrono::FixedOffset;
use serde::Serialize;

use super::error::ResolveError;
use super::models::{ChannelKind, ChannelSchedule, NowPlaying, Schedule};
use super::resolver::resolve_channel;
use crate::media::MediaIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Warn,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Warn => "warn",
            HealthStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHealth {
    pub channel_id: String,
    pub kind: String,
    pub active: bool,
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub missing_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now_playing: Option<NowPlaying>,
}

impl ChannelHealth {
    fn flag(&mut self, status: HealthStatus, issue: impl Into<String>) {
        self.status = self.status.max(status);
        self.issues.push(issue.into());
    }
}

/// Checks every channel on its own; one broken channel never hides the
/// state of the others.
pub fn check_channels(
    schedule: &Schedule,
    index: &MediaIndex,
    at_ms: i64,
    offset: FixedOffset,
) -> Vec<ChannelHealth> {
    schedule
        .channels
        .iter()
        .map(|(channel_id, channel)| check_channel(channel_id, channel, index, at_ms, offset))
        .collect()
}

pub fn check_channel(
    channel_id: &str,
    channel: &ChannelSchedule,
    index: &MediaIndex,
    at_ms: i64,
    offset: FixedOffset,
) -> ChannelHealth {
    let mut health = ChannelHealth {
        channel_id: channel_id.to_string(),
        kind: channel.kind.to_string(),
        active: channel.active,
        status: HealthStatus::Ok,
        issues: Vec::new(),
        missing_files: Vec::new(),
        now_playing: None,
    };

    if let Err(err) = channel.validate(channel_id) {
        health.flag(HealthStatus::Error, err.to_string());
        return health;
    }

    for file in channel.referenced_files() {
        match index.by_path(file) {
            None => health.missing_files.push(file.to_string()),
            Some(item) if item.duration_seconds <= 0 => {
                health.flag(HealthStatus::Warn, format!("{file} has no known duration"));
            }
            Some(_) => {}
        }
    }
    if !health.missing_files.is_empty() {
        let count = health.missing_files.len();
        health.flag(
            HealthStatus::Warn,
            format!("{count} file(s) missing from the media index"),
        );
    }

    if channel.kind == ChannelKind::Looping {
        let unplayable = channel
            .playlist
            .iter()
            .flatten()
            .filter(|item| item.playable_duration().is_none())
            .count();
        if unplayable > 0 {
            health.flag(
                HealthStatus::Warn,
                format!("{unplayable} playlist item(s) without a duration are skipped"),
            );
        }
    }

    if !channel.active {
        health.flag(HealthStatus::Warn, "channel is inactive");
        return health;
    }

    match resolve_channel(channel_id, channel, at_ms, offset) {
        Ok(now) => health.now_playing = Some(now),
        Err(err @ ResolveError::NotScheduled { .. }) => {
            health.flag(HealthStatus::Warn, err.to_string())
        }
        Err(err) => health.flag(HealthStatus::Error, err.to_string()),
    }
    health
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaIndexItem;
    use crate::schedule::models::{PlaylistItem, ScheduleSlot};
    use chrono::{Offset, TimeZone, Utc};

    fn index_with(paths: &[(&str, i64)]) -> MediaIndex {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        MediaIndex {
            generated_at: at,
            items: paths
                .iter()
                .map(|(path, duration)| {
                    MediaIndexItem::new(path, 1, at, at).with_duration(*duration)
                })
                .collect(),
        }
    }

    #[test]
    fn each_channel_is_checked_independently() {
        let mut schedule = Schedule::default();
        schedule.channels.insert(
            "good".into(),
            ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 60.0)]),
        );
        schedule.channels.insert(
            "empty".into(),
            ChannelSchedule::looping(vec![PlaylistItem::new("b.mp4", 0.0)]),
        );
        schedule.channels.insert(
            "gap".into(),
            ChannelSchedule::twenty_four_hour(vec![ScheduleSlot::new("10:00", "11:00", "a.mp4")]),
        );
        let index = index_with(&[("a.mp4", 60)]);
        let report = check_channels(&schedule, &index, 0, Utc.fix());
        let by_id = |id: &str| report.iter().find(|h| h.channel_id == id).unwrap();

        assert_eq!(by_id("good").status, HealthStatus::Ok);
        assert!(by_id("good").now_playing.is_some());
        assert_eq!(by_id("empty").status, HealthStatus::Error);
        assert_eq!(by_id("empty").missing_files, vec!["b.mp4".to_string()]);
        assert_eq!(by_id("gap").status, HealthStatus::Warn);
    }

    #[test]
    fn invalid_channel_is_an_error() {
        let mut channel = ChannelSchedule::twenty_four_hour(Vec::new());
        channel.slots = None;
        let health = check_channel("x", &channel, &MediaIndex::default(), 0, Utc.fix());
        assert_eq!(health.status, HealthStatus::Error);
        assert_eq!(health.issues.len(), 1);
    }
}
