use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::error::{ProbeError, ProbeResult};
use super::fetch::HttpRangeFetcher;
use super::ffprobe::FfprobeStrategy;
use super::index::{MediaIndex, MediaIndexItem};
use super::mp4::MovieAtomStrategy;
use crate::config::ProbeSection;
use crate::exec::CommandExecutor;
use crate::remote::RemoteEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbedMedia {
    pub duration_seconds: Option<i64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

/// One way of learning a remote file's duration.
#[async_trait]
pub trait DurationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self, url: &Url) -> ProbeResult<ProbedMedia>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    /// Unchanged and already probed.
    Reuse,
    /// Unchanged, last probe failed recently.
    CoolingDown,
    Probe { reprobe: bool },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileProbeResult {
    pub rel_path: String,
    pub duration_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub was_reprobed: bool,
    pub was_cached: bool,
}

impl FileProbeResult {
    fn cached(item: &MediaIndexItem, success: bool, error: Option<String>) -> Self {
        Self {
            rel_path: item.rel_path.clone(),
            duration_seconds: item.duration_seconds,
            video_codec: item.video_codec.clone(),
            audio_codec: item.audio_codec.clone(),
            success,
            error,
            was_reprobed: false,
            was_cached: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub unchanged: usize,
    pub probed: usize,
    pub skipped_cooldown: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub items: Vec<MediaIndexItem>,
    pub results: Vec<FileProbeResult>,
    pub stats: ScanStats,
}

impl ScanOutcome {
    pub fn into_index(self, generated_at: DateTime<Utc>) -> MediaIndex {
        MediaIndex {
            generated_at,
            items: self.items,
        }
    }
}

/// Incremental duration prober. Files whose size and modification time
/// match the cached entry are not probed again.
pub struct DurationProber {
    base_url: Url,
    strategies: Vec<Arc<dyn DurationStrategy>>,
    concurrency: usize,
    failure_cooldown: ChronoDuration,
}

impl DurationProber {
    pub fn new(base_url: Url, strategies: Vec<Arc<dyn DurationStrategy>>) -> Self {
        Self {
            base_url,
            strategies,
            concurrency: 2,
            failure_cooldown: ChronoDuration::hours(24),
        }
    }

    /// ffprobe first, the movie-atom parser second.
    pub fn from_config(
        probe: &ProbeSection,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> ProbeResult<Self> {
        let cooldown = probe.failure_cooldown().ok_or_else(|| {
            ProbeError::InvalidConfig(format!(
                "failure_cooldown_hours {} is out of range",
                probe.failure_cooldown_hours
            ))
        })?;
        let base_url = parse_base_url(&probe.media_base_url)?;
        let fetcher = Arc::new(HttpRangeFetcher::new(probe.timeout())?);
        let strategies: Vec<Arc<dyn DurationStrategy>> = vec![
            Arc::new(FfprobeStrategy::new(
                probe.ffprobe.clone(),
                probe.timeout(),
                executor,
            )),
            Arc::new(MovieAtomStrategy::new(fetcher, probe.moov_window_kib)),
        ];
        Ok(Self::new(base_url, strategies)
            .with_concurrency(probe.concurrency)
            .with_failure_cooldown(cooldown))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_failure_cooldown(mut self, cooldown: ChronoDuration) -> Self {
        self.failure_cooldown = cooldown;
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// URL of `rel_path` under the base URL, each segment percent-encoded.
    pub fn media_url(&self, rel_path: &str) -> ProbeResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| ProbeError::InvalidUrl {
                rel_path: rel_path.to_string(),
                message: format!("{} cannot be a base", self.base_url),
            })?;
            segments
                .pop_if_empty()
                .extend(rel_path.split('/').filter(|part| !part.is_empty()));
        }
        Ok(url)
    }

    pub fn decide(
        &self,
        cached: Option<&MediaIndexItem>,
        entry: &RemoteEntry,
        now: DateTime<Utc>,
    ) -> ScanDecision {
        let Some(cached) = cached else {
            return ScanDecision::Probe { reprobe: false };
        };
        if !cached.matches_fingerprint(entry.size, entry.modified_at) {
            return ScanDecision::Probe { reprobe: true };
        }
        if cached.duration_seconds > 0 {
            return ScanDecision::Reuse;
        }
        match cached.probe_failed_at {
            Some(failed_at) if now - failed_at < self.failure_cooldown => ScanDecision::CoolingDown,
            _ => ScanDecision::Probe { reprobe: true },
        }
    }

    /// Runs the strategies in order until one reports a duration. Codecs
    /// come from the earliest strategy that reported them.
    pub async fn probe_file(&self, rel_path: &str) -> ProbeResult<ProbedMedia> {
        let url = self.media_url(rel_path)?;
        let mut merged = ProbedMedia::default();
        for strategy in &self.strategies {
            match strategy.probe(&url).await {
                Ok(probed) => {
                    merged.video_codec = merged.video_codec.or(probed.video_codec);
                    merged.audio_codec = merged.audio_codec.or(probed.audio_codec);
                    if let Some(duration) = probed.duration_seconds {
                        debug!(file = %rel_path, strategy = strategy.name(), duration, "probed");
                        merged.duration_seconds = Some(duration);
                        return Ok(merged);
                    }
                    debug!(file = %rel_path, strategy = strategy.name(), "no duration reported");
                }
                Err(err) => {
                    warn!(
                        file = %rel_path,
                        strategy = strategy.name(),
                        error = %err,
                        "probe strategy failed"
                    );
                }
            }
        }
        Err(ProbeError::Exhausted {
            rel_path: rel_path.to_string(),
            attempts: self.strategies.len(),
        })
    }

    /// Produces the next index for `files`. Entries missing from `files`
    /// are dropped; per-file failures are recorded, never propagated.
    pub async fn scan(
        &self,
        files: &[RemoteEntry],
        cache: &MediaIndex,
        now: DateTime<Utc>,
    ) -> ScanOutcome {
        let cached: HashMap<&str, &MediaIndexItem> = cache
            .items
            .iter()
            .map(|item| (item.rel_path.as_str(), item))
            .collect();
        let mut stats = ScanStats::default();
        let mut items = Vec::with_capacity(files.len());
        let mut results = Vec::with_capacity(files.len());
        let mut pending = Vec::new();

        for entry in files {
            let previous = cached.get(entry.rel_path.as_str()).copied();
            match (self.decide(previous, entry, now), previous) {
                (ScanDecision::Reuse, Some(item)) => {
                    stats.unchanged += 1;
                    results.push(FileProbeResult::cached(item, true, None));
                    items.push(item.clone());
                }
                (ScanDecision::CoolingDown, Some(item)) => {
                    stats.skipped_cooldown += 1;
                    results.push(FileProbeResult::cached(
                        item,
                        false,
                        Some("previous probe failed; waiting for cooldown".to_string()),
                    ));
                    items.push(item.clone());
                }
                (ScanDecision::Probe { reprobe }, _) => pending.push((entry, previous, reprobe)),
                // Reuse/CoolingDown always come with a cached item
                (_, None) => pending.push((entry, None, false)),
            }
        }

        for batch in pending.chunks(self.concurrency.max(1)) {
            let outcomes =
                join_all(batch.iter().map(|(entry, _, _)| self.probe_file(&entry.rel_path))).await;
            for ((entry, previous, reprobe), outcome) in batch.iter().zip(outcomes) {
                stats.probed += 1;
                let date_added = previous.map_or(now, |item| item.date_added);
                let base =
                    MediaIndexItem::new(&entry.rel_path, entry.size, entry.modified_at, date_added);
                match outcome {
                    Ok(probed) => {
                        stats.succeeded += 1;
                        let duration = probed.duration_seconds.unwrap_or_default();
                        let item = base
                            .with_duration(duration)
                            .with_codecs(probed.video_codec, probed.audio_codec);
                        results.push(FileProbeResult {
                            rel_path: entry.rel_path.clone(),
                            duration_seconds: item.duration_seconds,
                            video_codec: item.video_codec.clone(),
                            audio_codec: item.audio_codec.clone(),
                            success: true,
                            error: None,
                            was_reprobed: *reprobe,
                            was_cached: false,
                        });
                        items.push(item);
                    }
                    Err(err) => {
                        stats.failed += 1;
                        let mut item = base;
                        item.probe_failed_at = Some(now);
                        results.push(FileProbeResult {
                            rel_path: entry.rel_path.clone(),
                            duration_seconds: 0,
                            video_codec: None,
                            audio_codec: None,
                            success: false,
                            error: Some(err.to_string()),
                            was_reprobed: *reprobe,
                            was_cached: false,
                        });
                        items.push(item);
                    }
                }
            }
        }

        items.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        info!(
            files = files.len(),
            unchanged = stats.unchanged,
            probed = stats.probed,
            skipped = stats.skipped_cooldown,
            failed = stats.failed,
            "media scan finished"
        );
        ScanOutcome {
            items,
            results,
            stats,
        }
    }
}

fn parse_base_url(raw: &str) -> ProbeResult<Url> {
    let mut url = Url::parse(raw).map_err(|err| ProbeError::InvalidUrl {
        rel_path: String::new(),
        message: format!("{raw}: {err}"),
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
