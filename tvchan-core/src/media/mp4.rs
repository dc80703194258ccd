use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::error::{ProbeError, ProbeResult};
use super::fetch::RangeFetcher;
use super::prober::{DurationStrategy, ProbedMedia};

const MOVIE: &[u8; 4] = b"moov";
const MOVIE_HEADER: &[u8; 4] = b"mvhd";
const MEDIA_DATA: &[u8; 4] = b"mdat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomHeader {
    pub offset: usize,
    pub kind: [u8; 4],
    pub header_len: usize,
    /// Total atom size including the header; `None` when the atom runs to
    /// the end of the file.
    pub size: Option<u64>,
}

impl AtomHeader {
    pub fn content_start(&self) -> usize {
        self.offset + self.header_len
    }

    pub fn end(&self) -> Option<u64> {
        self.size.map(|size| self.offset as u64 + size)
    }
}

fn be_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

fn be_u64(buf: &[u8], at: usize) -> Option<u64> {
    let bytes = buf.get(at..at.checked_add(8)?)?;
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

/// 32-bit size, 4-byte type, and a 64-bit `largesize` when size is 1.
/// Size 0 means "to end of file".
pub fn read_atom_header(buf: &[u8], offset: usize) -> Option<AtomHeader> {
    let size = be_u32(buf, offset)?;
    let kind: [u8; 4] = buf.get(offset + 4..offset + 8)?.try_into().ok()?;
    let (size, header_len) = match size {
        0 => (None, 8),
        1 => (Some(be_u64(buf, offset + 8)?), 16),
        size => (Some(u64::from(size)), 8),
    };
    if let Some(size) = size {
        if size < header_len as u64 {
            return None;
        }
    }
    Some(AtomHeader {
        offset,
        kind,
        header_len,
        size,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopLevelScan {
    MovieAtom { offset: usize },
    /// Media data precedes the movie atom; it lives near the end.
    MediaDataFirst,
    /// The window ended before either atom was found.
    Incomplete,
}

pub fn scan_top_level(buf: &[u8]) -> TopLevelScan {
    let mut offset = 0usize;
    while let Some(header) = read_atom_header(buf, offset) {
        if &header.kind == MOVIE {
            return TopLevelScan::MovieAtom { offset };
        }
        if &header.kind == MEDIA_DATA {
            return TopLevelScan::MediaDataFirst;
        }
        match header.end().and_then(|end| usize::try_from(end).ok()) {
            Some(end) => offset = end,
            None => break,
        }
    }
    TopLevelScan::Incomplete
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovieHeader {
    pub version: u8,
    pub timescale: u32,
    pub duration: u64,
}

impl MovieHeader {
    pub fn duration_seconds(&self) -> Option<i64> {
        if self.timescale == 0 {
            return None;
        }
        let seconds = (self.duration as f64 / f64::from(self.timescale)).round();
        if seconds >= 1.0 {
            Some(seconds as i64)
        } else {
            None
        }
    }
}

/// Parses the movie header inside the movie atom starting at `offset`.
/// The buffer may end inside the movie atom as long as the header is
/// complete.
pub fn parse_movie_header(buf: &[u8], offset: usize) -> ProbeResult<MovieHeader> {
    let movie = read_atom_header(buf, offset)
        .filter(|header| &header.kind == MOVIE)
        .ok_or_else(|| ProbeError::MissingMovieAtom(format!("no moov atom at {offset}")))?;
    let limit = movie
        .end()
        .and_then(|end| usize::try_from(end).ok())
        .map_or(buf.len(), |end| end.min(buf.len()));

    let mut child = movie.content_start();
    while child < limit {
        let Some(header) = read_atom_header(buf, child) else {
            break;
        };
        if &header.kind == MOVIE_HEADER {
            return read_movie_header(buf, header.content_start()).ok_or_else(|| {
                ProbeError::MissingMovieAtom("truncated mvhd atom".to_string())
            });
        }
        match header.end().and_then(|end| usize::try_from(end).ok()) {
            Some(end) if end > child => child = end,
            _ => break,
        }
    }
    Err(ProbeError::MissingMovieAtom(
        "mvhd not found inside moov".to_string(),
    ))
}

fn read_movie_header(buf: &[u8], at: usize) -> Option<MovieHeader> {
    let version = *buf.get(at)?;
    // version(1) + flags(3)
    let body = at + 4;
    let (timescale, duration) = if version == 1 {
        // creation(8) + modification(8)
        let timescale = be_u32(buf, body + 16)?;
        (timescale, be_u64(buf, body + 20)?)
    } else {
        // creation(4) + modification(4)
        let timescale = be_u32(buf, body + 8)?;
        (timescale, u64::from(be_u32(buf, body + 12)?))
    };
    Some(MovieHeader {
        version,
        timescale,
        duration,
    })
}

/// Finds a movie atom inside an arbitrary window (e.g. the file tail),
/// accepting only candidates whose header parses.
pub fn locate_movie_atom(buf: &[u8]) -> Option<(usize, MovieHeader)> {
    buf.windows(4)
        .enumerate()
        .skip(4)
        .filter(|(_, window)| *window == &MOVIE[..])
        .find_map(|(tag_at, _)| {
            let offset = tag_at - 4;
            parse_movie_header(buf, offset)
                .ok()
                .map(|header| (offset, header))
        })
}

/// Reads the movie header straight from the container with HTTP range
/// requests: the head window first, the tail window when media data comes
/// first.
pub struct MovieAtomStrategy {
    fetcher: Arc<dyn RangeFetcher>,
    window_bytes: u64,
}

impl MovieAtomStrategy {
    pub fn new(fetcher: Arc<dyn RangeFetcher>, window_kib: u64) -> Self {
        Self {
            fetcher,
            window_bytes: window_kib.max(1) * 1024,
        }
    }

    async fn from_tail(&self, url: &Url) -> ProbeResult<MovieHeader> {
        let total = self.fetcher.content_length(url).await?;
        if total == 0 {
            return Err(ProbeError::MissingMovieAtom("empty file".to_string()));
        }
        let start = total.saturating_sub(self.window_bytes);
        let tail = self.fetcher.fetch_range(url, start, total - 1).await?;
        locate_movie_atom(&tail)
            .map(|(_, header)| header)
            .ok_or_else(|| ProbeError::MissingMovieAtom("moov not in trailing window".into()))
    }
}

#[async_trait]
impl DurationStrategy for MovieAtomStrategy {
    fn name(&self) -> &'static str {
        "movie_atom"
    }

    async fn probe(&self, url: &Url) -> ProbeResult<ProbedMedia> {
        let head = self
            .fetcher
            .fetch_range(url, 0, self.window_bytes - 1)
            .await?;
        let header = match scan_top_level(&head) {
            TopLevelScan::MovieAtom { offset } => match parse_movie_header(&head, offset) {
                Ok(header) => header,
                Err(err) => {
                    // mvhd past the head window
                    debug!(url = %url, error = %err, "retrying movie atom at its offset");
                    let start = offset as u64;
                    let body = self
                        .fetcher
                        .fetch_range(url, start, start + self.window_bytes - 1)
                        .await?;
                    parse_movie_header(&body, 0)?
                }
            },
            TopLevelScan::MediaDataFirst | TopLevelScan::Incomplete => self.from_tail(url).await?,
        };
        let duration_seconds = header.duration_seconds().ok_or(ProbeError::NoDuration)?;
        Ok(ProbedMedia {
            duration_seconds: Some(duration_seconds),
            video_codec: None,
            audio_codec: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Builds an atom from its type and payload.
    pub fn atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    pub fn mvhd_v0(timescale: u32, duration: u32) -> Vec<u8> {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&[0; 8]);
        payload.extend_from_slice(&timescale.to_be_bytes());
        payload.extend_from_slice(&duration.to_be_bytes());
        payload.extend_from_slice(&[0; 80]);
        atom(b"mvhd", &payload)
    }

    pub fn mvhd_v1(timescale: u32, duration: u64) -> Vec<u8> {
        let mut payload = vec![1u8, 0, 0, 0];
        payload.extend_from_slice(&[0; 16]);
        payload.extend_from_slice(&timescale.to_be_bytes());
        payload.extend_from_slice(&duration.to_be_bytes());
        payload.extend_from_slice(&[0; 80]);
        atom(b"mvhd", &payload)
    }

    pub fn movie(mvhd: Vec<u8>) -> Vec<u8> {
        let mut payload = atom(b"udta", b"meta");
        payload.extend(mvhd);
        atom(b"moov", &payload)
    }
}
