use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tvchan_core::media::MEDIA_INDEX_KEY;
use tvchan_core::remote::{media_backend, state_store};
use tvchan_core::schedule::SCHEDULE_KEY;
use tvchan_core::{
    check_channels, load_config, AtomicJsonStore, ChannelHealth, ChannelSchedule, DurationProber,
    ErrorKind, HealthStatus, MediaIndex, MediaLibrary, MediaRefresh, NowPlaying, RepairReport,
    ScheduleStore, StatusReport, TvchanConfig,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] tvchan_core::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] tvchan_core::StoreError),
    #[error("schedule error: {0}")]
    Schedule(#[from] tvchan_core::ScheduleError),
    #[error("probe error: {0}")]
    Probe(#[from] tvchan_core::ProbeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unhealthy: {0}")]
    Unhealthy(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config(_) => ErrorKind::NotConfigured,
            AppError::Store(err) => err.kind(),
            AppError::Schedule(err) => err.kind(),
            AppError::Probe(err) => err.kind(),
            AppError::Io(_) | AppError::Serialize(_) => ErrorKind::Internal,
            AppError::Unhealthy(_) => ErrorKind::ScheduleInvalid,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "tvchan channel control interface", long_about = None)]
pub struct Cli {
    /// Path to tvchan.toml
    #[arg(long, default_value = "configs/tvchan.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Shows what a channel is playing
    Now(NowArgs),
    /// Channel schedule management
    #[command(subcommand)]
    Channels(ChannelCommands),
    /// Inspection and repair of stored documents
    #[command(subcommand)]
    Doc(DocCommands),
    /// Media library operations
    #[command(subcommand)]
    Media(MediaCommands),
    /// Checks every channel against the media index
    Health(HealthArgs),
}

#[derive(Args, Debug)]
pub struct NowArgs {
    pub channel: String,
    /// Epoch milliseconds; defaults to the current time
    #[arg(long)]
    pub at: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub enum ChannelCommands {
    /// Lists configured channels
    List,
    /// Stores a channel read from a JSON file
    Put(ChannelPutArgs),
    /// Removes a channel
    Remove(ChannelIdArgs),
    /// Puts a channel back on air
    Activate(ChannelIdArgs),
    /// Takes a channel off air without deleting it
    Deactivate(ChannelIdArgs),
    /// Replaces the schedule with an empty one
    Reset,
}

#[derive(Args, Debug)]
pub struct ChannelIdArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct ChannelPutArgs {
    pub id: String,
    /// JSON file holding one channel schedule
    pub file: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum DocCommands {
    /// Reports whether a document parses
    Status(DocArgs),
    /// Recovers a corrupted document, keeping a backup of the original
    Repair(DocArgs),
}

#[derive(Args, Debug)]
pub struct DocArgs {
    pub name: String,
    /// Top-level key holding the document entries
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum MediaCommands {
    /// Lists the library, probes new files and rewrites the media index
    Scan,
}

#[derive(Args, Debug)]
pub struct HealthArgs {
    #[arg(long)]
    pub at: Option<i64>,
}

/// Installs the fmt subscriber on stderr. `RUST_LOG` wins over the
/// configured filter.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    init_tracing(&config.logging.filter);
    let context = AppContext::from_config(config)?;

    match &cli.command {
        Commands::Now(args) => {
            let now = context.now_playing(&args.channel, args.at).await?;
            render(&now, cli.format)?;
        }
        Commands::Channels(ChannelCommands::List) => {
            let list = context.channel_list().await?;
            render(&list, cli.format)?;
        }
        Commands::Channels(ChannelCommands::Put(args)) => {
            let change = context.channel_put(&args.id, &args.file).await?;
            render(&change, cli.format)?;
        }
        Commands::Channels(ChannelCommands::Remove(args)) => {
            let change = context.channel_remove(&args.id).await?;
            render(&change, cli.format)?;
        }
        Commands::Channels(ChannelCommands::Activate(args)) => {
            let change = context.channel_set_active(&args.id, true).await?;
            render(&change, cli.format)?;
        }
        Commands::Channels(ChannelCommands::Deactivate(args)) => {
            let change = context.channel_set_active(&args.id, false).await?;
            render(&change, cli.format)?;
        }
        Commands::Channels(ChannelCommands::Reset) => {
            let change = context.channel_reset().await?;
            render(&change, cli.format)?;
        }
        Commands::Doc(DocCommands::Status(args)) => {
            let status = context.doc_status(&args.name).await;
            render(&status, cli.format)?;
        }
        Commands::Doc(DocCommands::Repair(args)) => {
            let report = context.doc_repair(&args.name, args.key.as_deref()).await?;
            render(&report, cli.format)?;
        }
        Commands::Media(MediaCommands::Scan) => {
            let refresh = context.media_scan().await?;
            render(&refresh, cli.format)?;
        }
        Commands::Health(args) => {
            let report = context.health(args.at).await?;
            render(&report, cli.format)?;
            if report.status == HealthStatus::Error {
                return Err(AppError::Unhealthy(
                    "one or more channels failed their checks".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

pub struct AppContext {
    config: TvchanConfig,
    store: Arc<AtomicJsonStore>,
    schedules: ScheduleStore,
}

impl AppContext {
    pub fn from_config(config: TvchanConfig) -> Result<Self> {
        let store = Arc::new(state_store(&config, None)?);
        let schedules = ScheduleStore::new(Arc::clone(&store), &config.store.schedule_document)
            .with_utc_offset(config.schedule.utc_offset());
        Ok(Self {
            config,
            store,
            schedules,
        })
    }

    async fn now_playing(&self, channel: &str, at: Option<i64>) -> Result<NowPlaying> {
        let at_ms = at.unwrap_or_else(|| Utc::now().timestamp_millis());
        Ok(self.schedules.now_playing(channel, at_ms).await?)
    }

    async fn channel_list(&self) -> Result<ChannelList> {
        let schedule = self.schedules.load().await?;
        let rows = schedule
            .channels
            .iter()
            .map(|(id, channel)| ChannelEntry::new(id, channel))
            .collect();
        Ok(ChannelList { rows })
    }

    async fn channel_put(&self, id: &str, file: &Path) -> Result<ChannelChange> {
        let raw = fs::read(file)?;
        let channel: ChannelSchedule = serde_json::from_slice(&raw)?;
        let stored_as = self.schedules.upsert_channel(id, channel).await?;
        Ok(ChannelChange::new(stored_as, "stored"))
    }

    async fn channel_remove(&self, id: &str) -> Result<ChannelChange> {
        self.schedules.remove_channel(id).await?;
        Ok(ChannelChange::new(id, "removed"))
    }

    async fn channel_set_active(&self, id: &str, active: bool) -> Result<ChannelChange> {
        self.schedules.set_active(id, active).await?;
        let action = if active { "activated" } else { "deactivated" };
        Ok(ChannelChange::new(id, action))
    }

    async fn channel_reset(&self) -> Result<ChannelChange> {
        let location = self.schedules.reset().await?;
        Ok(ChannelChange {
            channel_id: None,
            action: "reset".to_string(),
            location: Some(location),
        })
    }

    async fn doc_status(&self, name: &str) -> StatusReport {
        self.store.check_status(name).await
    }

    async fn doc_repair(&self, name: &str, key: Option<&str>) -> Result<RepairReport> {
        let key = key.unwrap_or_else(|| self.default_repair_key(name));
        let report = self.store.repair(name, key).await?;
        info!(
            document = %name,
            corrupted = report.was_corrupted,
            recovered = report.recovered_entry_count,
            "document repair finished"
        );
        Ok(report)
    }

    fn default_repair_key(&self, name: &str) -> &'static str {
        if name == self.config.store.media_index_document {
            MEDIA_INDEX_KEY
        } else {
            SCHEDULE_KEY
        }
    }

    async fn media_scan(&self) -> Result<MediaRefresh> {
        let media = media_backend(&self.config, None)?;
        let prober = DurationProber::from_config(&self.config.probe, None)?;
        let library = MediaLibrary::new(
            Arc::clone(&self.store),
            media,
            prober,
            &self.config.store.media_index_document,
        )
        .with_list_timeout(self.config.store.list_timeout());
        Ok(library.refresh(Utc::now()).await?)
    }

    async fn health(&self, at: Option<i64>) -> Result<HealthReport> {
        let at_ms = at.unwrap_or_else(|| Utc::now().timestamp_millis());
        let schedule = self.schedules.load().await?;
        let index: MediaIndex = self
            .store
            .read(&self.config.store.media_index_document, MediaIndex::default())
            .await?;
        let channels = check_channels(&schedule, &index, at_ms, self.config.schedule.utc_offset());
        let status = channels
            .iter()
            .map(|channel| channel.status)
            .max()
            .unwrap_or(HealthStatus::Ok);
        Ok(HealthReport {
            at_ms,
            indexed_files: index.len(),
            status,
            channels,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ChannelList {
    pub rows: Vec<ChannelEntry>,
}

#[derive(Debug, Serialize)]
pub struct ChannelEntry {
    pub id: String,
    pub kind: String,
    pub active: bool,
    pub short_name: Option<String>,
    pub items: usize,
}

impl ChannelEntry {
    fn new(id: &str, channel: &ChannelSchedule) -> Self {
        let items = channel
            .slots
            .as_ref()
            .map(Vec::len)
            .or_else(|| channel.playlist.as_ref().map(Vec::len))
            .unwrap_or(0);
        Self {
            id: id.to_string(),
            kind: channel.kind.to_string(),
            active: channel.active,
            short_name: channel.short_name.clone(),
            items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChannelChange {
    pub channel_id: Option<String>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ChannelChange {
    fn new(channel_id: impl Into<String>, action: &str) -> Self {
        Self {
            channel_id: Some(channel_id.into()),
            action: action.to_string(),
            location: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub at_ms: i64,
    pub indexed_files: usize,
    pub status: HealthStatus,
    pub channels: Vec<ChannelHealth>,
}

impl DisplayFallback for NowPlaying {
    fn display(&self) -> String {
        let title = self.title.as_deref().unwrap_or("<untitled>");
        format!(
            "{channel}: {file} ({title}) at {offset}s of {duration}s, ends at {ends}",
            channel = self.channel_id,
            file = self.rel_path,
            offset = self.start_offset_seconds,
            duration = self.duration_seconds,
            ends = self.ends_at
        )
    }
}

impl DisplayFallback for ChannelList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No channels configured".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let state = if entry.active { "on" } else { "off" };
            lines.push(format!(
                "{} | {} | {} | items={} | {}",
                entry.id,
                entry.kind,
                state,
                entry.items,
                entry.short_name.as_deref().unwrap_or("-")
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for ChannelChange {
    fn display(&self) -> String {
        match (&self.channel_id, &self.location) {
            (Some(id), _) => format!("channel {id} {}", self.action),
            (None, Some(location)) => format!("schedule {} ({location})", self.action),
            (None, None) => format!("schedule {}", self.action),
        }
    }
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {} ({detail})", self.name, self.status.as_str()),
            None => format!("{}: {}", self.name, self.status.as_str()),
        }
    }
}

impl DisplayFallback for RepairReport {
    fn display(&self) -> String {
        if !self.was_corrupted {
            return format!(
                "{}: healthy, {} entries",
                self.name, self.recovered_entry_count
            );
        }
        let mut lines = vec![format!(
            "{}: repaired, {} entries recovered",
            self.name, self.recovered_entry_count
        )];
        if let Some(strategy) = self.strategy {
            lines.push(format!("  - strategy: {}", strategy.name()));
        }
        if let Some(backup) = &self.backup_location {
            lines.push(format!("  - backup: {backup}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for MediaRefresh {
    fn display(&self) -> String {
        let stats = &self.stats;
        let mut lines = vec![format!(
            "{} files indexed -> {} (unchanged={}, probed={}, cooldown={}, ok={}, failed={})",
            self.index.len(),
            self.location,
            stats.unchanged,
            stats.probed,
            stats.skipped_cooldown,
            stats.succeeded,
            stats.failed
        )];
        for result in self.results.iter().filter(|result| !result.success) {
            lines.push(format!(
                "  [fail] {}: {}",
                result.rel_path,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for HealthReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "overall: {} ({} channels, {} indexed files)",
            self.status.as_str(),
            self.channels.len(),
            self.indexed_files
        )];
        for channel in &self.channels {
            let playing = channel
                .now_playing
                .as_ref()
                .map(|now| format!(" playing {}", now.rel_path))
                .unwrap_or_default();
            lines.push(format!(
                "[{}] {}{}",
                channel.status.as_str(),
                channel.channel_id,
                playing
            ));
            for issue in &channel.issues {
                lines.push(format!("    - {issue}"));
            }
        }
        lines.join("\n")
    }
}
