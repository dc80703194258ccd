use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, FixedOffset, Offset, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TvchanConfig {
    pub store: StoreSection,
    #[serde(default)]
    pub remote: RemoteSection,
    pub probe: ProbeSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TvchanConfig {
    /// Rejects values that parse but cannot be used.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.probe.failure_cooldown().is_none() {
            return Err(format!(
                "probe.failure_cooldown_hours {} is out of range",
                self.probe.failure_cooldown_hours
            ));
        }
        if self.schedule.try_utc_offset().is_none() {
            return Err(format!(
                "schedule.utc_offset_minutes {} must be within one day of UTC",
                self.schedule.utc_offset_minutes
            ));
        }
        Ok(())
    }

    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.store.local_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// Directory used when no remote is configured.
    pub local_dir: String,
    pub schedule_document: String,
    pub media_index_document: String,
    /// Local copy of the video library, used when the remote is disabled.
    #[serde(default)]
    pub media_dir: Option<String>,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_seconds: u64,
    #[serde(default = "default_list_timeout")]
    pub list_timeout_seconds: u64,
}

impl StoreSection {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds.max(1))
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rclone_binary")]
    pub rclone_binary: String,
    /// rclone remote path, e.g. `media:tv/state`.
    pub state_remote: Option<String>,
    /// rclone remote path holding the video library.
    pub media_remote: Option<String>,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            enabled: false,
            rclone_binary: default_rclone_binary(),
            state_remote: None,
            media_remote: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSection {
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    /// Public base URL the media tree is reachable at over HTTP.
    pub media_base_url: String,
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_cooldown")]
    pub failure_cooldown_hours: i64,
    #[serde(default = "default_moov_window")]
    pub moov_window_kib: u64,
}

impl ProbeSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    /// `None` when the configured hours are negative or out of range.
    pub fn failure_cooldown(&self) -> Option<ChronoDuration> {
        if self.failure_cooldown_hours < 0 {
            return None;
        }
        ChronoDuration::try_hours(self.failure_cooldown_hours)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleSection {
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl ScheduleSection {
    /// `None` unless the offset is strictly within one day of UTC.
    pub fn try_utc_offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }

    /// The configured offset; UTC when it is out of range.
    pub fn utc_offset(&self) -> FixedOffset {
        self.try_utc_offset().unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_operation_timeout() -> u64 {
    15
}

fn default_list_timeout() -> u64 {
    10
}

fn default_rclone_binary() -> String {
    "rclone".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_probe_timeout() -> u64 {
    12
}

fn default_concurrency() -> usize {
    2
}

fn default_cooldown() -> i64 {
    24
}

fn default_moov_window() -> u64 {
    512
}

fn default_log_filter() -> String {
    "info".to_string()
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TvchanConfig> {
    let path = path.as_ref();
    let config: TvchanConfig = load_toml(path)?;
    config.check().map_err(|message| ConfigError::Invalid {
        path: path.to_path_buf(),
        message,
    })?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/tvchan.toml");
        let config = load_config(path).expect("config should parse");
        assert_eq!(config.store.schedule_document, "channels.json");
        assert_eq!(config.store.operation_timeout(), Duration::from_secs(15));
        assert_eq!(config.probe.concurrency, 2);
        assert_eq!(config.probe.failure_cooldown_hours, 24);
        assert!(!config.remote.enabled);
        assert_eq!(config.store.media_dir.as_deref(), Some("media"));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let raw = r#"
            [store]
            local_dir = "/tmp/tvchan"
            schedule_document = "channels.json"
            media_index_document = "media-index.json"

            [probe]
            media_base_url = "https://media.example.com/library/"
        "#;
        let config: TvchanConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.probe.timeout(), Duration::from_secs(12));
        assert_eq!(config.probe.moov_window_kib, 512);
        assert_eq!(config.store.list_timeout(), Duration::from_secs(10));
        assert_eq!(config.schedule.utc_offset().local_minus_utc(), 0);
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.remote.rclone_binary, "rclone");
    }

    fn with_numbers(cooldown_hours: i64, offset_minutes: i32) -> TvchanConfig {
        let raw = format!(
            r#"
            [store]
            local_dir = "/tmp/tvchan"
            schedule_document = "channels.json"
            media_index_document = "media-index.json"

            [probe]
            media_base_url = "https://media.example.com/"
            failure_cooldown_hours = {cooldown_hours}

            [schedule]
            utc_offset_minutes = {offset_minutes}
            "#
        );
        toml::from_str(&raw).unwrap()
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        let huge = with_numbers(i64::MAX, 0);
        assert!(huge.probe.failure_cooldown().is_none());
        assert!(huge.check().unwrap_err().contains("failure_cooldown_hours"));
        assert!(with_numbers(-1, 0).check().is_err());

        let offset = with_numbers(24, i32::MAX);
        assert!(offset.schedule.try_utc_offset().is_none());
        assert_eq!(offset.schedule.utc_offset().local_minus_utc(), 0);
        assert!(offset.check().unwrap_err().contains("utc_offset_minutes"));
        assert!(with_numbers(24, 24 * 60).check().is_err());

        let fine = with_numbers(24, -300);
        assert!(fine.check().is_ok());
        assert_eq!(fine.schedule.utc_offset().local_minus_utc(), -300 * 60);
    }

    #[test]
    fn load_reports_invalid_values_with_the_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tvchan.toml");
        std::fs::write(
            &path,
            r#"
            [store]
            local_dir = "/tmp/tvchan"
            schedule_document = "channels.json"
            media_index_document = "media-index.json"

            [probe]
            media_base_url = "https://media.example.com/"
            failure_cooldown_hours = 9223372036854775807
            "#,
        )
        .unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("tvchan.toml"));
    }

    #[test]
    fn relative_paths_resolve_against_local_dir() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/tvchan.toml");
        let mut config = load_config(path).unwrap();
        config.store.local_dir = "/srv/tvchan".into();
        assert_eq!(
            config.resolve_path("channels.json"),
            PathBuf::from("/srv/tvchan/channels.json")
        );
        assert_eq!(config.resolve_path("/abs/x"), PathBuf::from("/abs/x"));
    }
}
