use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, warn};

use super::error::{ProbeError, ProbeResult};
use super::index::{is_video_file, MediaIndex, MEDIA_INDEX_KEY};
use super::prober::{DurationProber, FileProbeResult, ScanStats};
use crate::remote::{AtomicJsonStore, RemoteEntry, RemoteStore, StoreError, UpdateOptions};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRefresh {
    pub location: String,
    pub index: MediaIndex,
    pub results: Vec<FileProbeResult>,
    pub stats: ScanStats,
}

/// Keeps the media index document in step with the video library.
pub struct MediaLibrary {
    state: Arc<AtomicJsonStore>,
    media: Arc<dyn RemoteStore>,
    prober: DurationProber,
    index_document: String,
    list_timeout: Duration,
}

impl MediaLibrary {
    pub fn new(
        state: Arc<AtomicJsonStore>,
        media: Arc<dyn RemoteStore>,
        prober: DurationProber,
        index_document: impl Into<String>,
    ) -> Self {
        Self {
            state,
            media,
            prober,
            index_document: index_document.into(),
            list_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_list_timeout(mut self, limit: Duration) -> Self {
        self.list_timeout = limit;
        self
    }

    pub fn index_document(&self) -> &str {
        &self.index_document
    }

    /// Video files in the library, hidden files excluded.
    pub async fn list_media(&self) -> ProbeResult<Vec<RemoteEntry>> {
        let listing = timeout(self.list_timeout, self.media.list(""))
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "list",
                name: self.media.location(""),
                timeout: self.list_timeout,
            })??;
        Ok(listing
            .into_iter()
            .filter(|entry| is_video_file(&entry.rel_path))
            .collect())
    }

    /// Reads the cached index, repairing it first when it is corrupted.
    pub async fn load_index(&self) -> ProbeResult<MediaIndex> {
        match self
            .state
            .read(&self.index_document, MediaIndex::empty())
            .await
        {
            Ok(index) => Ok(index),
            Err(StoreError::Corrupted { message, .. }) => {
                warn!(
                    document = %self.index_document,
                    error = %message,
                    "media index corrupted, repairing"
                );
                let report = self
                    .state
                    .repair(&self.index_document, MEDIA_INDEX_KEY)
                    .await?;
                info!(
                    document = %self.index_document,
                    recovered = report.recovered_entry_count,
                    "media index repaired"
                );
                Ok(self
                    .state
                    .read(&self.index_document, MediaIndex::empty())
                    .await?)
            }
            Err(err) => Err(ProbeError::Store(err)),
        }
    }

    /// Lists the library, probes what changed, and persists the new index.
    /// The scan runs outside the document lock, so the result is merged with
    /// whatever another refresh stored meanwhile.
    pub async fn refresh(&self, now: DateTime<Utc>) -> ProbeResult<MediaRefresh> {
        let files = self.list_media().await?;
        let cache = self.load_index().await?;
        let outcome = self.prober.scan(&files, &cache, now).await;
        let results = outcome.results.clone();
        let stats = outcome.stats;
        let next = outcome.into_index(now);

        let options = UpdateOptions::safe().repair_with(MEDIA_INDEX_KEY);
        let index = self
            .state
            .atomic_update(
                &self.index_document,
                MediaIndex::empty(),
                &options,
                move |current: MediaIndex| -> Result<MediaIndex, StoreError> {
                    Ok(next.merge_newer(&current))
                },
            )
            .await?;
        let location = self.state.location(&self.index_document);
        info!(document = %self.index_document, items = index.len(), "media index saved");
        Ok(MediaRefresh {
            location,
            index,
            results,
            stats,
        })
    }
}
