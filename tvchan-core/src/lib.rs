pub mod config;
pub mod error;
pub mod exec;
pub mod media;
pub mod remote;
pub mod schedule;

pub use config::{
    load_config, LoggingSection, ProbeSection, RemoteSection, ScheduleSection, StoreSection,
    TvchanConfig,
};
pub use error::{ConfigError, ErrorKind, Result};
pub use exec::{CommandExecutor, SystemCommandExecutor};
pub use media::{
    DurationProber, DurationStrategy, FileProbeResult, MediaIndex, MediaIndexItem, MediaLibrary,
    MediaRefresh, ProbeError, ProbeResult, ProbedMedia, ScanOutcome, ScanStats,
};
pub use remote::{
    AtomicJsonStore, DocumentStatus, LocalDirStore, LockTable, RcloneStore, RemoteEntry,
    RemoteStore, RepairReport, RepairStrategy, StatusReport, StoreError, StoreResult,
    UpdateOptions,
};
pub use schedule::{
    check_channels, ChannelHealth, ChannelKind, ChannelSchedule, HealthStatus, NowPlaying,
    PlaylistItem, ResolveError, ResolveResult, Resolver, Schedule, ScheduleError,
    ScheduleResult, ScheduleSlot, ScheduleStore,
};
