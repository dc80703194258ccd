use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MEDIA_INDEX_KEY: &str = "items";

/// Extensions picked up when listing the library.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "webm", "mkv", "avi", "ts", "mpg", "mpeg", "wmv", "flv", "ogv",
];

const PLAYABLE_CONTAINERS: &[&str] = &["mp4", "m4v", "mov", "webm"];
const PLAYABLE_VIDEO_CODECS: &[&str] = &["h264", "vp8", "vp9", "av1"];
const PLAYABLE_AUDIO_CODECS: &[&str] = &["aac", "mp3", "opus", "vorbis"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaIndexItem {
    pub rel_path: String,
    #[serde(default)]
    pub duration_seconds: i64,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_failed_at: Option<DateTime<Utc>>,
    pub date_added: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub supported: bool,
}

impl MediaIndexItem {
    pub fn new(
        rel_path: &str,
        size: u64,
        modified_at: DateTime<Utc>,
        date_added: DateTime<Utc>,
    ) -> Self {
        let format = media_format(rel_path);
        let supported = is_supported(&format, None, None);
        Self {
            rel_path: rel_path.to_string(),
            duration_seconds: 0,
            size,
            modified_at,
            probe_failed_at: None,
            date_added,
            video_codec: None,
            audio_codec: None,
            format,
            supported,
        }
    }

    pub fn with_duration(mut self, seconds: i64) -> Self {
        self.duration_seconds = seconds.max(0);
        self
    }

    pub fn with_codecs(mut self, video: Option<String>, audio: Option<String>) -> Self {
        self.video_codec = video;
        self.audio_codec = audio;
        self.supported = is_supported(
            &self.format,
            self.video_codec.as_deref(),
            self.audio_codec.as_deref(),
        );
        self
    }

    /// Same size and same modification second as the listing entry.
    pub fn matches_fingerprint(&self, size: u64, modified_at: DateTime<Utc>) -> bool {
        self.size == size && self.modified_at.timestamp() == modified_at.timestamp()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaIndex {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<MediaIndexItem>,
}

impl Default for MediaIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl MediaIndex {
    pub fn empty() -> Self {
        Self {
            generated_at: DateTime::<Utc>::UNIX_EPOCH,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn by_path(&self, rel_path: &str) -> Option<&MediaIndexItem> {
        self.items.iter().find(|item| item.rel_path == rel_path)
    }

    /// Folds in what a concurrent writer learned about the same file
    /// versions. The path set of `self` is kept; for an unchanged file the
    /// entry from `current` wins when it has a duration `self` lacks, or a
    /// later failure stamp.
    pub fn merge_newer(mut self, current: &MediaIndex) -> Self {
        for item in &mut self.items {
            let Some(stored) = current.by_path(&item.rel_path) else {
                continue;
            };
            if !stored.matches_fingerprint(item.size, item.modified_at) {
                continue;
            }
            let knows_duration = stored.duration_seconds > 0 && item.duration_seconds <= 0;
            let failed_later = stored.duration_seconds <= 0
                && item.duration_seconds <= 0
                && stored.probe_failed_at > item.probe_failed_at;
            if knows_duration || failed_later {
                *item = stored.clone();
            }
        }
        self
    }

    /// Duration usable for scheduling, if the file has been probed.
    pub fn playable_duration(&self, rel_path: &str) -> Option<i64> {
        self.by_path(rel_path)
            .map(|item| item.duration_seconds)
            .filter(|seconds| *seconds > 0)
    }
}

/// Lower-case file extension, empty when there is none.
pub fn media_format(rel_path: &str) -> String {
    Path::new(rel_path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn is_video_file(rel_path: &str) -> bool {
    VIDEO_EXTENSIONS.contains(&media_format(rel_path).as_str())
}

/// Whether a browser can play the file directly. Unknown codecs do not
/// count against it.
pub fn is_supported(format: &str, video_codec: Option<&str>, audio_codec: Option<&str>) -> bool {
    let codec_ok = |codec: Option<&str>, allowed: &[&str]| {
        codec.map_or(true, |name| allowed.contains(&name.to_ascii_lowercase().as_str()))
    };
    PLAYABLE_CONTAINERS.contains(&format)
        && codec_ok(video_codec, PLAYABLE_VIDEO_CODECS)
        && codec_ok(audio_codec, PLAYABLE_AUDIO_CODECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_and_support() {
        assert_eq!(media_format("Shows/Pilot.MP4"), "mp4");
        assert_eq!(media_format("README"), "");
        assert!(is_supported("mp4", Some("h264"), Some("aac")));
        assert!(is_supported("webm", Some("VP9"), None));
        assert!(!is_supported("mp4", Some("hevc"), Some("aac")));
        assert!(!is_supported("mkv", Some("h264"), Some("aac")));
        assert!(is_video_file("a/b.mkv"));
        assert!(!is_video_file("a/b.srt"));
    }

    #[test]
    fn fingerprint_ignores_subsecond_precision() {
        let at = Utc.with_ymd_and_hms(2024, 2, 2, 12, 0, 0).unwrap();
        let item = MediaIndexItem::new("a.mp4", 10, at, at);
        let jittered = at + chrono::Duration::milliseconds(400);
        assert!(item.matches_fingerprint(10, jittered));
        assert!(!item.matches_fingerprint(11, at));
    }

    #[test]
    fn document_shape_uses_camel_case() {
        let at = Utc.with_ymd_and_hms(2024, 2, 2, 12, 0, 0).unwrap();
        let index = MediaIndex {
            generated_at: at,
            items: vec![MediaIndexItem::new("a.mp4", 10, at, at)
                .with_duration(42)
                .with_codecs(Some("h264".into()), Some("aac".into()))],
        };
        let value = serde_json::to_value(&index).unwrap();
        assert_eq!(value["items"][0]["relPath"], "a.mp4");
        assert_eq!(value["items"][0]["durationSeconds"], 42);
        assert_eq!(value["items"][0]["supported"], true);
        assert!(value["items"][0].get("probeFailedAt").is_none());
        assert_eq!(index.playable_duration("a.mp4"), Some(42));
        assert_eq!(index.playable_duration("b.mp4"), None);
    }

    #[test]
    fn merge_keeps_newer_knowledge_for_unchanged_files() {
        let at = Utc.with_ymd_and_hms(2024, 2, 2, 12, 0, 0).unwrap();
        let later = at + chrono::Duration::hours(1);
        let next = MediaIndex {
            generated_at: later,
            items: vec![
                MediaIndexItem::new("a.mp4", 10, at, at),
                MediaIndexItem::new("b.mp4", 10, at, at).with_duration(30),
                MediaIndexItem::new("c.mp4", 20, later, at),
                MediaIndexItem::new("d.mp4", 10, at, at),
            ],
        };
        let mut failed = MediaIndexItem::new("d.mp4", 10, at, at);
        failed.probe_failed_at = Some(later);
        let current = MediaIndex {
            generated_at: at,
            items: vec![
                MediaIndexItem::new("a.mp4", 10, at, at).with_duration(42),
                MediaIndexItem::new("b.mp4", 10, at, at).with_duration(99),
                MediaIndexItem::new("c.mp4", 10, at, at).with_duration(7),
                failed,
                MediaIndexItem::new("gone.mp4", 10, at, at).with_duration(5),
            ],
        };

        let merged = next.merge_newer(&current);
        assert_eq!(merged.generated_at, later);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.playable_duration("a.mp4"), Some(42));
        // both know a duration, the fresh scan wins
        assert_eq!(merged.playable_duration("b.mp4"), Some(30));
        // the file changed since the stored entry
        assert_eq!(merged.playable_duration("c.mp4"), None);
        assert_eq!(merged.by_path("d.mp4").unwrap().probe_failed_at, Some(later));
        assert!(merged.by_path("gone.mp4").is_none());
    }
}
