use chrono::{FixedOffset, Offset, Utc};

use super::error::{ResolveError, ResolveResult};
use super::models::{ChannelKind, ChannelSchedule, NowPlaying, Schedule, SECONDS_PER_DAY};

/// Maps a schedule snapshot and a wall-clock instant to what is on air.
///
/// Local midnight for 24-hour channels is taken in a fixed UTC offset;
/// looping channels count from the Unix epoch and ignore it.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    offset: FixedOffset,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::utc()
    }
}

impl Resolver {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn resolve(
        &self,
        schedule: &Schedule,
        channel_id: &str,
        at_ms: i64,
    ) -> ResolveResult<NowPlaying> {
        let channel = schedule
            .get(channel_id)
            .ok_or_else(|| ResolveError::ChannelNotFound {
                channel_id: channel_id.to_string(),
            })?;
        resolve_channel(channel_id, channel, at_ms, self.offset)
    }
}

pub fn resolve_channel(
    channel_id: &str,
    channel: &ChannelSchedule,
    at_ms: i64,
    offset: FixedOffset,
) -> ResolveResult<NowPlaying> {
    if !channel.active {
        return Err(ResolveError::ChannelInactive {
            channel_id: channel_id.to_string(),
        });
    }
    channel.validate(channel_id)?;
    match channel.kind {
        ChannelKind::TwentyFourHour => resolve_slots(channel_id, channel, at_ms, offset),
        ChannelKind::Looping => resolve_loop(channel_id, channel, at_ms),
        // validate() already rejected this
        ChannelKind::Other(ref raw) => Err(ResolveError::InvalidSchedule {
            channel_id: channel_id.to_string(),
            reason: format!("unknown channel type {raw:?}"),
        }),
    }
}

/// Seconds since local midnight for an epoch-ms instant.
pub fn seconds_of_day(at_ms: i64, offset: FixedOffset) -> i64 {
    (at_ms.div_euclid(1000) + i64::from(offset.local_minus_utc())).rem_euclid(SECONDS_PER_DAY)
}

fn resolve_slots(
    channel_id: &str,
    channel: &ChannelSchedule,
    at_ms: i64,
    offset: FixedOffset,
) -> ResolveResult<NowPlaying> {
    let t = seconds_of_day(at_ms, offset);
    for slot in channel.slots.iter().flatten() {
        let (Some(start), Some(end)) = (slot.start_seconds(), slot.end_seconds()) else {
            continue;
        };
        let Some(window) = slot_window(start, end, t) else {
            continue;
        };
        let elapsed = (t - start).rem_euclid(SECONDS_PER_DAY);
        let duration = slot.playable_duration().unwrap_or(window);
        let start_offset = elapsed % duration;
        return Ok(NowPlaying {
            channel_id: channel_id.to_string(),
            rel_path: slot.file.clone(),
            title: slot.title.clone(),
            duration_seconds: duration,
            start_offset_seconds: start_offset,
            ends_at: ends_at(channel_id, at_ms, duration - start_offset)?,
        });
    }
    Err(ResolveError::NotScheduled {
        channel_id: channel_id.to_string(),
        seconds_of_day: t,
    })
}

/// Window length when the slot `[start, end)` covers `t`. A slot whose end
/// precedes its start runs across midnight; `start == end` is empty.
fn slot_window(start: i64, end: i64, t: i64) -> Option<i64> {
    if end > start {
        (start <= t && t < end).then_some(end - start)
    } else if end < start {
        (t >= start || t < end).then_some(SECONDS_PER_DAY - start + end)
    } else {
        None
    }
}

fn resolve_loop(
    channel_id: &str,
    channel: &ChannelSchedule,
    at_ms: i64,
) -> ResolveResult<NowPlaying> {
    let playable: Vec<_> = channel
        .playlist
        .iter()
        .flatten()
        .filter_map(|item| item.playable_duration().map(|duration| (item, duration)))
        .collect();
    let total = playable
        .iter()
        .try_fold(0i64, |sum, (_, duration)| sum.checked_add(*duration))
        .ok_or_else(|| overflow(channel_id, "playlist length"))?;
    if total <= 0 {
        return Err(ResolveError::EmptyLoop {
            channel_id: channel_id.to_string(),
        });
    }

    let elapsed = at_ms
        .div_euclid(1000)
        .checked_sub(channel.epoch_offset_seconds())
        .ok_or_else(|| overflow(channel_id, "epoch offset"))?;
    let position = elapsed.rem_euclid(total);

    let mut item_start = 0;
    for (item, duration) in playable {
        if position < item_start + duration {
            let start_offset = position - item_start;
            return Ok(NowPlaying {
                channel_id: channel_id.to_string(),
                rel_path: item.file.clone(),
                title: item.title.clone(),
                duration_seconds: duration,
                start_offset_seconds: start_offset,
                ends_at: ends_at(channel_id, at_ms, duration - start_offset)?,
            });
        }
        item_start += duration;
    }

    // position < total, so the walk always lands on an item
    Err(ResolveError::EmptyLoop {
        channel_id: channel_id.to_string(),
    })
}

fn ends_at(channel_id: &str, at_ms: i64, remaining_seconds: i64) -> ResolveResult<i64> {
    remaining_seconds
        .checked_mul(1000)
        .and_then(|remaining_ms| at_ms.checked_add(remaining_ms))
        .ok_or_else(|| overflow(channel_id, "end time"))
}

fn overflow(channel_id: &str, what: &str) -> ResolveError {
    ResolveError::InvalidSchedule {
        channel_id: channel_id.to_string(),
        reason: format!("{what} overflows the clock range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::models::{PlaylistItem, ScheduleSlot};

    fn utc() -> FixedOffset {
        Utc.fix()
    }

    #[test]
    fn slot_repeats_short_media_inside_window() {
        let mut slot = ScheduleSlot::new("10:00", "12:00", "show.mp4");
        slot.duration_seconds = Some(1800.0);
        let channel = ChannelSchedule::twenty_four_hour(vec![slot]);
        // 10:45:10
        let at_ms = (10 * 3600 + 45 * 60 + 10) * 1000;
        let now = resolve_channel("c", &channel, at_ms, utc()).unwrap();
        assert_eq!(now.duration_seconds, 1800);
        assert_eq!(now.start_offset_seconds, 15 * 60 + 10);
        assert_eq!(now.ends_at, at_ms + (1800 - 910) * 1000);
    }

    #[test]
    fn empty_slot_never_matches() {
        let channel =
            ChannelSchedule::twenty_four_hour(vec![ScheduleSlot::new("05:00", "05:00", "x.mp4")]);
        let err = resolve_channel("c", &channel, 5 * 3600 * 1000, utc()).unwrap_err();
        assert!(matches!(err, ResolveError::NotScheduled { seconds_of_day: 18_000, .. }));
    }

    #[test]
    fn utc_offset_shifts_local_midnight() {
        let channel = ChannelSchedule::twenty_four_hour(vec![
            ScheduleSlot::new("00:00", "01:00", "early.mp4"),
            ScheduleSlot::new("01:00", "24:00", "rest.mp4"),
        ]);
        let plus_one = FixedOffset::east_opt(3600).unwrap();
        // 23:30 UTC is 00:30 local
        let at_ms = (23 * 3600 + 30 * 60) * 1000;
        let now = resolve_channel("c", &channel, at_ms, plus_one).unwrap();
        assert_eq!(now.rel_path, "early.mp4");
        assert_eq!(now.start_offset_seconds, 1800);
    }

    #[test]
    fn inactive_channel_is_reported() {
        let mut channel = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 10.0)]);
        channel.active = false;
        let err = resolve_channel("c", &channel, 0, utc()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::ChannelInactive {
                channel_id: "c".into()
            }
        );
    }

    #[test]
    fn loop_skips_items_without_duration() {
        let channel = ChannelSchedule::looping(vec![
            PlaylistItem::new("zero.mp4", 0.0),
            PlaylistItem::new("a.mp4", 100.0),
            PlaylistItem::new("nan.mp4", f64::NAN),
            PlaylistItem::new("b.mp4", 50.0),
        ]);
        let now = resolve_channel("c", &channel, 120_000, utc()).unwrap();
        assert_eq!(now.rel_path, "b.mp4");
        assert_eq!(now.start_offset_seconds, 20);
    }

    #[test]
    fn extreme_numbers_are_rejected_not_panicking() {
        let shifted = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 60.0)])
            .with_epoch_offset_hours(-1e30);
        assert!(matches!(
            resolve_channel("c", &shifted, 0, utc()),
            Err(ResolveError::InvalidSchedule { .. })
        ));

        let endless = ChannelSchedule::looping(vec![
            PlaylistItem::new("a.mp4", 1e300),
            PlaylistItem::new("b.mp4", 1e300),
        ]);
        assert!(matches!(
            resolve_channel("c", &endless, 0, utc()),
            Err(ResolveError::InvalidSchedule { .. })
        ));

        let mut slot = ScheduleSlot::new("00:00", "24:00", "a.mp4");
        slot.duration_seconds = Some(1e300);
        let day = ChannelSchedule::twenty_four_hour(vec![slot]);
        assert!(matches!(
            resolve_channel("c", &day, 0, utc()),
            Err(ResolveError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn end_time_near_clock_limit_is_an_error() {
        let channel = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 3600.0)]);
        let err = resolve_channel("c", &channel, i64::MAX - 10, utc()).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidSchedule { .. }));
    }

    #[test]
    fn loop_without_playable_items_errors() {
        let channel = ChannelSchedule::looping(vec![PlaylistItem::new("a.mp4", 0.0)]);
        let err = resolve_channel("c", &channel, 0, utc()).unwrap_err();
        assert!(matches!(err, ResolveError::EmptyLoop { .. }));
        let empty = ChannelSchedule::looping(Vec::new());
        assert!(matches!(
            resolve_channel("c", &empty, 0, utc()),
            Err(ResolveError::EmptyLoop { .. })
        ));
    }

    #[test]
    fn missing_channel_is_not_found() {
        let err = Resolver::utc()
            .resolve(&Schedule::default(), "nope", 0)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
