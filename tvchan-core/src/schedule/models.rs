use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{ResolveError, ResolveResult};

pub const SECONDS_PER_DAY: i64 = 86_400;
/// Longest media duration a schedule may declare: ten years.
pub const MAX_DURATION_SECONDS: f64 = 315_360_000.0;
/// Largest loop epoch shift in either direction: a hundred years.
pub const MAX_EPOCH_OFFSET_HOURS: f64 = 876_600.0;

/// Channel flavour as stored in the `type` field.
///
/// Unknown strings are kept verbatim so a rewrite of the document never
/// drops a channel written by a newer editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelKind {
    TwentyFourHour,
    Looping,
    Other(String),
}

impl ChannelKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelKind::TwentyFourHour => "24hour",
            ChannelKind::Looping => "looping",
            ChannelKind::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for ChannelKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "24hour" => ChannelKind::TwentyFourHour,
            "looping" => ChannelKind::Looping,
            _ => ChannelKind::Other(value),
        }
    }
}

impl From<ChannelKind> for String {
    fn from(kind: ChannelKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub start: String,
    pub end: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Known media duration, filled from the media index by editors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScheduleSlot {
    pub fn new(start: impl Into<String>, end: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            file: file.into(),
            title: None,
            duration_seconds: None,
            extra: Map::new(),
        }
    }

    pub fn start_seconds(&self) -> Option<i64> {
        parse_time_of_day(&self.start).filter(|seconds| *seconds < SECONDS_PER_DAY)
    }

    pub fn end_seconds(&self) -> Option<i64> {
        parse_time_of_day(&self.end)
    }

    pub fn playable_duration(&self) -> Option<i64> {
        self.duration_seconds.and_then(playable_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlaylistItem {
    pub fn new(file: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            file: file.into(),
            title: None,
            duration_seconds,
            extra: Map::new(),
        }
    }

    pub fn playable_duration(&self) -> Option<i64> {
        playable_seconds(self.duration_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSchedule {
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<ScheduleSlot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist: Option<Vec<PlaylistItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_offset_hours: Option<f64>,
    /// Fields written by other editors, kept so rewrites do not drop them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_active() -> bool {
    true
}

impl ChannelSchedule {
    pub fn twenty_four_hour(slots: Vec<ScheduleSlot>) -> Self {
        Self {
            kind: ChannelKind::TwentyFourHour,
            slots: Some(slots),
            playlist: None,
            short_name: None,
            active: true,
            epoch_offset_hours: None,
            extra: Map::new(),
        }
    }

    pub fn looping(playlist: Vec<PlaylistItem>) -> Self {
        Self {
            kind: ChannelKind::Looping,
            slots: None,
            playlist: Some(playlist),
            short_name: None,
            active: true,
            epoch_offset_hours: None,
            extra: Map::new(),
        }
    }

    pub fn with_epoch_offset_hours(mut self, hours: f64) -> Self {
        self.epoch_offset_hours = Some(hours);
        self
    }

    /// Clears whichever list the channel type does not use.
    pub fn normalize(&mut self) {
        match self.kind {
            ChannelKind::TwentyFourHour => self.playlist = None,
            ChannelKind::Looping => self.slots = None,
            ChannelKind::Other(_) => {}
        }
    }

    pub fn epoch_offset_seconds(&self) -> i64 {
        self.epoch_offset_hours
            .filter(|hours| hours.is_finite())
            .map(|hours| (hours * 3600.0).round() as i64)
            .unwrap_or(0)
    }

    pub fn validate(&self, channel_id: &str) -> ResolveResult<()> {
        let invalid = |reason: String| ResolveError::InvalidSchedule {
            channel_id: channel_id.to_string(),
            reason,
        };
        if let Some(hours) = self.epoch_offset_hours {
            if hours.is_finite() && hours.abs() > MAX_EPOCH_OFFSET_HOURS {
                return Err(invalid(format!("epochOffsetHours {hours} is out of range")));
            }
        }
        match &self.kind {
            ChannelKind::TwentyFourHour => {
                let slots = self
                    .slots
                    .as_ref()
                    .ok_or_else(|| invalid("24hour channel has no slots".into()))?;
                for (index, slot) in slots.iter().enumerate() {
                    if slot.start_seconds().is_none() {
                        return Err(invalid(format!(
                            "slot {index} has invalid start {:?}",
                            slot.start
                        )));
                    }
                    if slot.end_seconds().is_none() {
                        return Err(invalid(format!(
                            "slot {index} has invalid end {:?}",
                            slot.end
                        )));
                    }
                    if slot.file.trim().is_empty() {
                        return Err(invalid(format!("slot {index} has no file")));
                    }
                    if slot.duration_seconds.is_some_and(duration_out_of_range) {
                        return Err(invalid(format!("slot {index} duration is out of range")));
                    }
                }
                Ok(())
            }
            ChannelKind::Looping => {
                let playlist = self
                    .playlist
                    .as_ref()
                    .ok_or_else(|| invalid("looping channel has no playlist".into()))?;
                if let Some(index) = playlist.iter().position(|item| item.file.trim().is_empty()) {
                    return Err(invalid(format!("playlist item {index} has no file")));
                }
                if let Some(index) = playlist
                    .iter()
                    .position(|item| duration_out_of_range(item.duration_seconds))
                {
                    return Err(invalid(format!("playlist item {index} duration is out of range")));
                }
                Ok(())
            }
            ChannelKind::Other(raw) => Err(invalid(format!("unknown channel type {raw:?}"))),
        }
    }

    /// Every media path the channel references, in schedule order.
    pub fn referenced_files(&self) -> Vec<&str> {
        match self.kind {
            ChannelKind::TwentyFourHour => self
                .slots
                .iter()
                .flatten()
                .map(|slot| slot.file.as_str())
                .collect(),
            ChannelKind::Looping => self
                .playlist
                .iter()
                .flatten()
                .map(|item| item.file.as_str())
                .collect(),
            ChannelKind::Other(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelSchedule>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Schedule {
    pub fn get(&self, channel_id: &str) -> Option<&ChannelSchedule> {
        self.channels.get(channel_id)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channels that fail validation. They stay in the document.
    pub fn invalid_channels(&self) -> Vec<(String, ResolveError)> {
        self.channels
            .iter()
            .filter_map(|(id, channel)| channel.validate(id).err().map(|err| (id.clone(), err)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub channel_id: String,
    pub rel_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub duration_seconds: i64,
    pub start_offset_seconds: i64,
    /// Epoch milliseconds at which the current item finishes.
    pub ends_at: i64,
}

/// Maps an arbitrary label to the `[A-Za-z0-9_-]` alphabet used for map keys.
pub fn normalize_channel_id(raw: &str) -> Option<String> {
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();
    let pattern = DISALLOWED.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("static regex"));
    let replaced = pattern.replace_all(raw.trim(), "-");
    let trimmed = replaced.trim_matches('-');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses `HH:MM` or `HH:MM:SS` into seconds since midnight. `24:00` is the
/// end of the day.
pub fn parse_time_of_day(value: &str) -> Option<i64> {
    let mut parts = value.trim().split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = match parts.next() {
        Some(raw) => raw.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    if !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return None;
    }
    match hours {
        0..=23 => Some(hours * 3600 + minutes * 60 + seconds),
        24 if minutes == 0 && seconds == 0 => Some(SECONDS_PER_DAY),
        _ => None,
    }
}

// NaN and infinities are not rejected here; they just never play.
fn duration_out_of_range(value: f64) -> bool {
    value.is_finite() && value > MAX_DURATION_SECONDS
}

fn playable_seconds(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let rounded = value.round();
    if rounded >= 1.0 {
        Some(rounded as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_accepts_minutes_and_seconds() {
        assert_eq!(parse_time_of_day("00:00"), Some(0));
        assert_eq!(parse_time_of_day("06:30"), Some(23_400));
        assert_eq!(parse_time_of_day("23:59:59"), Some(86_399));
        assert_eq!(parse_time_of_day("24:00"), Some(SECONDS_PER_DAY));
        assert_eq!(parse_time_of_day("24:01"), None);
        assert_eq!(parse_time_of_day("7"), None);
        assert_eq!(parse_time_of_day("07:60"), None);
        assert_eq!(parse_time_of_day("aa:bb"), None);
    }

    #[test]
    fn channel_ids_are_normalized() {
        assert_eq!(normalize_channel_id("Movie Night!").as_deref(), Some("Movie-Night"));
        assert_eq!(normalize_channel_id("  cartoons_24 ").as_deref(), Some("cartoons_24"));
        assert_eq!(normalize_channel_id("çà/ñ").as_deref(), None);
        assert_eq!(normalize_channel_id("???"), None);
    }

    #[test]
    fn unknown_channel_type_survives_round_trip() {
        let raw = r#"{"channels":{"x":{"type":"weekly","active":false}}}"#;
        let schedule: Schedule = serde_json::from_str(raw).unwrap();
        let channel = schedule.get("x").unwrap();
        assert_eq!(channel.kind, ChannelKind::Other("weekly".into()));
        assert!(!channel.active);
        let encoded = serde_json::to_value(&schedule).unwrap();
        assert_eq!(encoded["channels"]["x"]["type"], "weekly");
        assert_eq!(schedule.invalid_channels().len(), 1);
    }

    #[test]
    fn normalize_clears_unused_list() {
        let mut channel = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 10.0)]);
        channel.slots = Some(vec![ScheduleSlot::new("00:00", "01:00", "b.mp4")]);
        channel.normalize();
        assert!(channel.slots.is_none());
        assert!(channel.playlist.is_some());
    }

    #[test]
    fn validation_bounds_durations_and_offsets() {
        let far = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 60.0)])
            .with_epoch_offset_hours(MAX_EPOCH_OFFSET_HOURS + 1.0);
        assert!(far.validate("c").is_err());
        let near = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 60.0)])
            .with_epoch_offset_hours(-MAX_EPOCH_OFFSET_HOURS);
        assert!(near.validate("c").is_ok());

        let long = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 4e8)]);
        assert!(long.validate("c").is_err());
        let unknown = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", f64::NAN)]);
        assert!(unknown.validate("c").is_ok());
    }

    #[test]
    fn playable_durations_require_positive_finite_values() {
        assert_eq!(PlaylistItem::new("a", 0.0).playable_duration(), None);
        assert_eq!(PlaylistItem::new("a", -5.0).playable_duration(), None);
        assert_eq!(PlaylistItem::new("a", f64::NAN).playable_duration(), None);
        assert_eq!(PlaylistItem::new("a", 0.4).playable_duration(), None);
        assert_eq!(PlaylistItem::new("a", 12.6).playable_duration(), Some(13));
    }

    #[test]
    fn serialized_fields_use_camel_case() {
        let channel = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 30.0)])
            .with_epoch_offset_hours(2.0);
        let value = serde_json::to_value(&channel).unwrap();
        assert_eq!(value["type"], "looping");
        assert_eq!(value["epochOffsetHours"], 2.0);
        assert_eq!(value["playlist"][0]["durationSeconds"], 30.0);
        assert!(value.get("slots").is_none());
    }
}
