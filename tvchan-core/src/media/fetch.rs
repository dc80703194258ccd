use std::io::SeekFrom;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use url::Url;

use super::error::{ProbeError, ProbeResult};

/// Partial reads of remote files.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Bytes `start..=end`, shorter when the file ends first.
    async fn fetch_range(&self, url: &Url, start: u64, end: u64) -> ProbeResult<Vec<u8>>;

    async fn content_length(&self, url: &Url) -> ProbeResult<u64>;
}

/// `Range` requests over reqwest; `file://` URLs are read from disk.
#[derive(Debug, Clone)]
pub struct HttpRangeFetcher {
    client: Client,
}

impl HttpRangeFetcher {
    pub fn new(timeout: Duration) -> ProbeResult<Self> {
        let client = Client::builder()
            .user_agent("tvchan-prober/0.1")
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|err| ProbeError::Network(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    async fn fetch_range(&self, url: &Url, start: u64, end: u64) -> ProbeResult<Vec<u8>> {
        if end < start {
            return Ok(Vec::new());
        }
        let wanted = (end - start + 1) as usize;
        if url.scheme() == "file" {
            return read_file_range(url, start, wanted).await;
        }

        let response = self
            .client
            .get(url.clone())
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()
            .await?
            .error_for_status()?;
        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        // servers that ignore Range send the whole body; skip and cap it
        let mut skip = if partial { 0 } else { start as usize };
        let mut buffer = Vec::with_capacity(wanted.min(1 << 20));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let mut data = &chunk[..];
            if skip > 0 {
                let dropped = skip.min(data.len());
                skip -= dropped;
                data = &data[dropped..];
            }
            let room = wanted - buffer.len();
            buffer.extend_from_slice(&data[..room.min(data.len())]);
            if buffer.len() >= wanted {
                break;
            }
        }
        Ok(buffer)
    }

    async fn content_length(&self, url: &Url) -> ProbeResult<u64> {
        if url.scheme() == "file" {
            let path = file_path(url)?;
            let metadata = fs::metadata(&path)
                .await
                .map_err(|err| ProbeError::Network(format!("{}: {err}", path.display())))?;
            return Ok(metadata.len());
        }

        let head = self.client.head(url.clone()).send().await?.error_for_status()?;
        if let Some(length) = header_u64(head.headers().get(CONTENT_LENGTH)) {
            if length > 0 {
                return Ok(length);
            }
        }
        // some servers omit Content-Length on HEAD; ask for one byte instead
        let probe = self
            .client
            .get(url.clone())
            .header(RANGE, "bytes=0-0")
            .send()
            .await?
            .error_for_status()?;
        probe
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(total_from_content_range)
            .ok_or_else(|| ProbeError::Network(format!("no content length for {url}")))
    }
}

fn header_u64(value: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    value?.to_str().ok()?.trim().parse().ok()
}

/// Total size from `bytes 0-0/12345`.
pub fn total_from_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn file_path(url: &Url) -> ProbeResult<std::path::PathBuf> {
    url.to_file_path()
        .map_err(|_| ProbeError::InvalidUrl {
            rel_path: url.to_string(),
            message: "not a local file url".to_string(),
        })
}

async fn read_file_range(url: &Url, start: u64, wanted: usize) -> ProbeResult<Vec<u8>> {
    let path = file_path(url)?;
    let io_error = |err: std::io::Error| ProbeError::Network(format!("{}: {err}", path.display()));
    let mut file = fs::File::open(&path).await.map_err(io_error)?;
    file.seek(SeekFrom::Start(start)).await.map_err(io_error)?;
    let mut buffer = Vec::with_capacity(wanted.min(1 << 20));
    file.take(wanted as u64)
        .read_to_end(&mut buffer)
        .await
        .map_err(io_error)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn content_range_total() {
        assert_eq!(total_from_content_range("bytes 0-0/12345"), Some(12_345));
        assert_eq!(total_from_content_range("bytes */99"), Some(99));
        assert_eq!(total_from_content_range("bytes 0-0/*"), None);
    }

    #[tokio::test]
    async fn file_urls_are_read_locally() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("clip.mp4");
        std::fs::write(&path, b"0123456789").unwrap();
        let url = Url::from_file_path(&path).unwrap();
        let fetcher = HttpRangeFetcher::new(Duration::from_secs(1)).unwrap();

        assert_eq!(fetcher.fetch_range(&url, 2, 5).await.unwrap(), b"2345");
        assert_eq!(fetcher.fetch_range(&url, 8, 100).await.unwrap(), b"89");
        assert_eq!(fetcher.content_length(&url).await.unwrap(), 10);
    }
}
