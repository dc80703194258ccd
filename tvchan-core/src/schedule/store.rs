use std::sync::Arc;

use chrono::FixedOffset;
use tracing::{info, warn};

use super::error::{ResolveError, ScheduleError, ScheduleResult};
use super::models::{normalize_channel_id, ChannelSchedule, NowPlaying, Schedule};
use super::resolver::Resolver;
use crate::remote::{AtomicJsonStore, StoreError, UpdateOptions};

pub const SCHEDULE_KEY: &str = "channels";

/// The channel map persisted as one JSON document. Every mutation is a
/// locked read-modify-write that aborts on read errors.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    store: Arc<AtomicJsonStore>,
    document: String,
    resolver: Resolver,
}

impl ScheduleStore {
    pub fn new(store: Arc<AtomicJsonStore>, document: impl Into<String>) -> Self {
        Self {
            store,
            document: document.into(),
            resolver: Resolver::utc(),
        }
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.resolver = Resolver::new(offset);
        self
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn atomic_store(&self) -> &Arc<AtomicJsonStore> {
        &self.store
    }

    fn options() -> UpdateOptions {
        UpdateOptions::safe().repair_with(SCHEDULE_KEY)
    }

    /// Loads the schedule, repairing a corrupted document first. Invalid
    /// channels are logged and kept.
    pub async fn load(&self) -> ScheduleResult<Schedule> {
        let schedule = match self.store.read(&self.document, Schedule::default()).await {
            Ok(schedule) => schedule,
            Err(StoreError::Corrupted { message, .. }) => {
                warn!(
                    document = %self.document,
                    error = %message,
                    "schedule corrupted, repairing"
                );
                let report = self.store.repair(&self.document, SCHEDULE_KEY).await?;
                info!(
                    document = %self.document,
                    recovered = report.recovered_entry_count,
                    backup = report.backup_location.as_deref().unwrap_or("-"),
                    "schedule repaired"
                );
                self.store.read(&self.document, Schedule::default()).await?
            }
            Err(err) => return Err(err.into()),
        };
        for (channel_id, err) in schedule.invalid_channels() {
            warn!(channel = %channel_id, error = %err, "schedule contains an invalid channel");
        }
        Ok(schedule)
    }

    /// Inserts or replaces a channel and returns the id it was stored under.
    /// Unknown fields of the replaced channel carry over unless overridden.
    pub async fn upsert_channel(
        &self,
        raw_id: &str,
        mut channel: ChannelSchedule,
    ) -> ScheduleResult<String> {
        let channel_id = normalize_channel_id(raw_id)
            .ok_or_else(|| ScheduleError::InvalidChannelId(raw_id.to_string()))?;
        channel.normalize();
        channel.validate(&channel_id)?;
        let id = channel_id.clone();
        self.store
            .atomic_update(
                &self.document,
                Schedule::default(),
                &Self::options(),
                move |mut schedule: Schedule| -> ScheduleResult<Schedule> {
                    let mut channel = channel;
                    if let Some(previous) = schedule.channels.remove(&id) {
                        for (key, value) in previous.extra {
                            channel.extra.entry(key).or_insert(value);
                        }
                    }
                    schedule.channels.insert(id, channel);
                    Ok(schedule)
                },
            )
            .await?;
        info!(channel = %channel_id, document = %self.document, "channel saved");
        Ok(channel_id)
    }

    pub async fn remove_channel(&self, channel_id: &str) -> ScheduleResult<ChannelSchedule> {
        let id = channel_id.to_string();
        let mut removed = None;
        let removed_ref = &mut removed;
        self.store
            .atomic_update(
                &self.document,
                Schedule::default(),
                &Self::options().require_existing(),
                move |mut schedule: Schedule| -> ScheduleResult<Schedule> {
                    let channel = schedule
                        .channels
                        .remove(&id)
                        .ok_or(ResolveError::ChannelNotFound { channel_id: id })?;
                    *removed_ref = Some(channel);
                    Ok(schedule)
                },
            )
            .await?;
        info!(channel = %channel_id, "channel removed");
        removed.ok_or_else(|| {
            ScheduleError::Resolve(ResolveError::ChannelNotFound {
                channel_id: channel_id.to_string(),
            })
        })
    }

    pub async fn set_active(&self, channel_id: &str, active: bool) -> ScheduleResult<()> {
        let id = channel_id.to_string();
        self.store
            .atomic_update(
                &self.document,
                Schedule::default(),
                &Self::options().require_existing(),
                move |mut schedule: Schedule| -> ScheduleResult<Schedule> {
                    let channel = schedule
                        .channels
                        .get_mut(&id)
                        .ok_or_else(|| ResolveError::ChannelNotFound {
                            channel_id: id.clone(),
                        })?;
                    channel.active = active;
                    Ok(schedule)
                },
            )
            .await?;
        info!(channel = %channel_id, active, "channel activation changed");
        Ok(())
    }

    /// Replaces the whole document with an empty channel map.
    pub async fn reset(&self) -> ScheduleResult<String> {
        let location = self.store.write(&self.document, &Schedule::default()).await?;
        warn!(document = %self.document, "schedule reset");
        Ok(location)
    }

    pub async fn now_playing(&self, channel_id: &str, at_ms: i64) -> ScheduleResult<NowPlaying> {
        let schedule = self.load().await?;
        Ok(self.resolver.resolve(&schedule, channel_id, at_ms)?)
    }
}
