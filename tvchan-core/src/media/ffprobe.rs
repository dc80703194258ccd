use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use super::error::{ProbeError, ProbeResult};
use super::prober::{DurationStrategy, ProbedMedia};
use crate::exec::{CommandExecutor, SystemCommandExecutor};

/// Runs `ffprobe` against the HTTP URL of a file. ffprobe reads only what
/// it needs from the stream.
pub struct FfprobeStrategy {
    binary: String,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl FfprobeStrategy {
    pub fn new(
        binary: impl Into<String>,
        timeout: Duration,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            executor: executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor)),
        }
    }

    fn command(&self, url: &Url) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg("-rw_timeout")
            .arg(self.timeout.as_micros().to_string())
            .arg("-reconnect")
            .arg("1")
            .arg("-reconnect_streamed")
            .arg("1")
            .arg("-reconnect_delay_max")
            .arg("2")
            .arg(url.as_str());
        command
    }
}

#[async_trait]
impl DurationStrategy for FfprobeStrategy {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, url: &Url) -> ProbeResult<ProbedMedia> {
        let mut command = self.command(url);
        let output = match timeout(self.timeout, self.executor.run(&mut command)).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ProbeError::Spawn {
                    program: self.binary.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ProbeError::Timeout {
                    tool: "ffprobe",
                    timeout: self.timeout,
                })
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(url = %url, %stderr, "ffprobe returned non-zero status");
            return Err(ProbeError::Command {
                status: output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string()),
                stderr,
            });
        }
        parse_ffprobe_output(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    nb_frames: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Duration preference: container, then any stream, then frame count over
/// average frame rate.
pub fn parse_ffprobe_output(stdout: &[u8]) -> ProbeResult<ProbedMedia> {
    let data: FfprobeOutput = serde_json::from_slice(stdout)?;
    let first_codec = |kind: &str| {
        data.streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some(kind))
            .and_then(|stream| stream.codec_name.clone())
    };
    let video_codec = first_codec("video");
    let audio_codec = first_codec("audio");

    let from_format = parse_seconds(data.format.duration.as_deref());
    let from_streams = || {
        data.streams
            .iter()
            .find_map(|stream| parse_seconds(stream.duration.as_deref()))
    };
    let from_frames = || {
        data.streams
            .iter()
            .filter(|stream| stream.codec_type.as_deref() == Some("video"))
            .find_map(|stream| {
                let frames: f64 = stream.nb_frames.as_deref()?.parse().ok()?;
                let rate = parse_rate(stream.avg_frame_rate.as_deref())?;
                positive_seconds(frames / rate)
            })
    };
    let duration_seconds = from_format.or_else(from_streams).or_else(from_frames);

    Ok(ProbedMedia {
        duration_seconds,
        video_codec,
        audio_codec,
    })
}

fn parse_seconds(value: Option<&str>) -> Option<i64> {
    value?.trim().parse::<f64>().ok().and_then(positive_seconds)
}

fn positive_seconds(value: f64) -> Option<i64> {
    if value.is_finite() && value.round() >= 1.0 {
        Some(value.round() as i64)
    } else {
        None
    }
}

fn parse_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    if rate.contains('/') {
        let mut parts = rate.split('/');
        let numerator = parts.next()?.parse::<f64>().ok()?;
        let denominator = parts.next()?.parse::<f64>().ok()?;
        if denominator == 0.0 || numerator == 0.0 {
            return None;
        }
        Some(numerator / denominator)
    } else {
        rate.parse::<f64>().ok().filter(|value| *value > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[cfg(unix)]
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn duration_prefers_container_value() {
        let raw = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "duration": "99.0"},
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"duration": "1799.6"}
        }"#;
        let probed = parse_ffprobe_output(raw).unwrap();
        assert_eq!(probed.duration_seconds, Some(1800));
        assert_eq!(probed.video_codec.as_deref(), Some("h264"));
        assert_eq!(probed.audio_codec.as_deref(), Some("aac"));
    }

    #[test]
    fn duration_falls_back_to_frame_count() {
        let raw = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "opus"},
                {"codec_type": "video", "codec_name": "vp9", "nb_frames": "1500", "avg_frame_rate": "25/1"}
            ],
            "format": {}
        }"#;
        let probed = parse_ffprobe_output(raw).unwrap();
        assert_eq!(probed.duration_seconds, Some(60));
    }

    #[test]
    fn missing_duration_keeps_codecs() {
        let raw = br#"{"streams":[{"codec_type":"video","codec_name":"av1","avg_frame_rate":"0/0"}]}"#;
        let probed = parse_ffprobe_output(raw).unwrap();
        assert_eq!(probed.duration_seconds, None);
        assert_eq!(probed.video_codec.as_deref(), Some("av1"));
        assert!(parse_ffprobe_output(b"not json").is_err());
    }

    #[cfg(unix)]
    struct CapturingExecutor {
        commands: Mutex<Vec<String>>,
    }

    #[cfg(unix)]
    #[async_trait]
    impl CommandExecutor for CapturingExecutor {
        async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
            self.commands
                .lock()
                .unwrap()
                .push(crate::exec::describe_command(command));
            Ok(std::process::Output {
                status: success(),
                stdout: br#"{"streams":[],"format":{"duration":"12.0"}}"#.to_vec(),
                stderr: Vec::new(),
            })
        }
    }

    #[cfg(unix)]
    fn success() -> std::process::ExitStatus {
        std::process::ExitStatus::from_raw(0)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_line_streams_over_http() {
        let executor = Arc::new(CapturingExecutor {
            commands: Mutex::new(Vec::new()),
        });
        let strategy =
            FfprobeStrategy::new("ffprobe", Duration::from_secs(12), Some(executor.clone()));
        let url = Url::parse("https://media.example.com/videos/a%20b.mp4").unwrap();
        let probed = strategy.probe(&url).await.unwrap();
        assert_eq!(probed.duration_seconds, Some(12));
        let line = executor.commands.lock().unwrap()[0].clone();
        assert_eq!(
            line,
            "ffprobe -v error -print_format json -show_format -show_streams -rw_timeout 12000000 \
             -reconnect 1 -reconnect_streamed 1 -reconnect_delay_max 2 \
             https://media.example.com/videos/a%20b.mp4"
        );
    }
}
