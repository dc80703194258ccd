mod error;
mod fetch;
mod ffprobe;
mod index;
mod library;
mod mp4;
mod prober;

pub use error::{ProbeError, ProbeResult};
pub use fetch::{total_from_content_range, HttpRangeFetcher, RangeFetcher};
pub use ffprobe::{parse_ffprobe_output, FfprobeStrategy};
pub use index::{
    is_supported, is_video_file, media_format, MediaIndex, MediaIndexItem, MEDIA_INDEX_KEY,
    VIDEO_EXTENSIONS,
};
pub use library::{MediaLibrary, MediaRefresh};
pub use mp4::{
    locate_movie_atom, parse_movie_header, read_atom_header, scan_top_level, AtomHeader,
    MovieAtomStrategy, MovieHeader, TopLevelScan,
};
pub use prober::{
    DurationProber, DurationStrategy, FileProbeResult, ProbedMedia, ScanDecision, ScanOutcome,
    ScanStats,
};
