mod error;
mod health;
mod models;
mod resolver;
mod store;

pub use error::{ResolveError, ResolveResult, ScheduleError, ScheduleResult};
pub use health::{check_channel, check_channels, ChannelHealth, HealthStatus};
pub use models::{
    normalize_channel_id, parse_time_of_day, ChannelKind, ChannelSchedule, NowPlaying,
    PlaylistItem, Schedule, ScheduleSlot, SECONDS_PER_DAY,
};
pub use resolver::{resolve_channel, seconds_of_day, Resolver};
pub use store::{ScheduleStore, SCHEDULE_KEY};
