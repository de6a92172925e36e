//! Single-invocation ffmpeg transformation steps: trim, compress, audio
//! extraction, and ordered merge, plus ffprobe duration probing.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::{timecode, PipelineError, Result};

/// Rate-limits progress emission so the delivery collaborator is not
/// overwhelmed by per-frame updates.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True when enough time has passed since the last accepted update.
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    fn ready_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Throttled fractional-progress callback handed to a transformation step.
pub struct ProgressReporter {
    throttle: Mutex<ProgressThrottle>,
    callback: Box<dyn Fn(f32) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(interval: Duration, callback: impl Fn(f32) + Send + Sync + 'static) -> Self {
        Self {
            throttle: Mutex::new(ProgressThrottle::new(interval)),
            callback: Box::new(callback),
        }
    }

    fn report(&self, percent: f32) {
        let ready = self
            .throttle
            .lock()
            .expect("progress throttle poisoned")
            .ready();
        if ready {
            (self.callback)(percent.clamp(0.0, 100.0));
        }
    }
}

/// Wraps single external transcoding invocations.
///
/// Every operation resolves exactly once with the output path or fails
/// exactly once carrying the engine's stderr.
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Transcoder {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Cut `[start, end)` out of an audio file.
    ///
    /// Rejects with `InvalidRange` before invoking the engine when
    /// `end - start <= 0`. With no end, cuts from `start` to the end of the
    /// input.
    pub async fn trim(
        &self,
        input: &Path,
        start_secs: u64,
        end_secs: Option<u64>,
        progress: Option<&ProgressReporter>,
    ) -> Result<PathBuf> {
        let duration_secs = match end_secs {
            Some(end) => {
                if end <= start_secs {
                    return Err(PipelineError::InvalidRange.into());
                }
                Some(end - start_secs)
            }
            None => None,
        };

        let output = trim_output_path(input, start_secs, end_secs);
        tracing::info!(
            "Trimming {} from {} ({:?}s)",
            input.display(),
            timecode::format(start_secs),
            duration_secs
        );

        let mut args: Vec<String> = vec![
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-ss".into(),
            start_secs.to_string(),
        ];
        if let Some(d) = duration_secs {
            args.push("-t".into());
            args.push(d.to_string());
        }
        args.push(output.to_string_lossy().into_owned());

        self.run_ffmpeg(&args, duration_secs.map(|d| d as f64), progress)
            .await?;
        Ok(output)
    }

    /// Re-encode to a fixed bitrate/channel/sample-rate target.
    ///
    /// Used by the size-guard escalation path when a deliverable exceeds the
    /// upload ceiling.
    pub async fn compress(
        &self,
        input: &Path,
        bitrate_kbps: u32,
        channels: u32,
        sample_rate: u32,
        progress: Option<&ProgressReporter>,
    ) -> Result<PathBuf> {
        let output = sibling_output(input, "-compressed", "mp3");
        tracing::info!(
            "Compressing {} at {}k/{}ch/{}Hz",
            input.display(),
            bitrate_kbps,
            channels,
            sample_rate
        );

        let total = match progress {
            Some(_) => self.probe_duration(input).await.ok(),
            None => None,
        };

        let args: Vec<String> = vec![
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-vn".into(),
            "-b:a".into(),
            format!("{}k", bitrate_kbps),
            "-ac".into(),
            channels.to_string(),
            "-ar".into(),
            sample_rate.to_string(),
            output.to_string_lossy().into_owned(),
        ];

        self.run_ffmpeg(&args, total, progress).await?;
        Ok(output)
    }

    /// Extract the audio track of a video container to mp3 at 192 kbps.
    pub async fn extract_audio(
        &self,
        input: &Path,
        progress: Option<&ProgressReporter>,
    ) -> Result<PathBuf> {
        let output = input.with_extension("mp3");
        tracing::info!("Extracting audio from {}", input.display());

        let total = match progress {
            Some(_) => self.probe_duration(input).await.ok(),
            None => None,
        };

        let args: Vec<String> = vec![
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-vn".into(),
            "-b:a".into(),
            "192k".into(),
            output.to_string_lossy().into_owned(),
        ];

        self.run_ffmpeg(&args, total, progress).await?;
        Ok(output)
    }

    /// Concatenate 2+ audio files in order into a single mp3.
    pub async fn merge(&self, inputs: &[PathBuf], out_dir: &Path) -> Result<PathBuf> {
        if inputs.len() < 2 {
            anyhow::bail!("Merge requires at least two inputs, got {}", inputs.len());
        }

        let output = out_dir.join(format!("merged-{}.mp3", uuid::Uuid::new_v4()));
        tracing::info!("Merging {} files into {}", inputs.len(), output.display());

        let mut args: Vec<String> = vec!["-y".into()];
        for input in inputs {
            args.push("-i".into());
            args.push(input.to_string_lossy().into_owned());
        }
        args.push("-filter_complex".into());
        args.push(format!("concat=n={}:v=0:a=1", inputs.len()));
        args.push(output.to_string_lossy().into_owned());

        self.run_ffmpeg(&args, None, None).await?;
        Ok(output)
    }

    /// Probe a media file's duration in seconds via ffprobe.
    pub async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                &path.to_string_lossy(),
            ])
            .output()
            .await
            .context("Failed to run ffprobe")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::UpstreamFailure(format!(
                "ffprobe failed: {}",
                error.trim()
            ))
            .into());
        }

        let info: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        info["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| anyhow::anyhow!("Cannot get audio duration for {}", path.display()))
    }

    /// Spawn ffmpeg, forward throttled progress from its `-progress` stream,
    /// and fail with the engine's stderr on a non-zero exit.
    async fn run_ffmpeg(
        &self,
        args: &[String],
        total_secs: Option<f64>,
        progress: Option<&ProgressReporter>,
    ) -> Result<()> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-nostats", "-loglevel", "error", "-progress", "pipe:1"])
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to run ffmpeg")?;

        let stdout = child.stdout.take().expect("ffmpeg stdout piped");
        let mut stderr = child.stderr.take().expect("ffmpeg stderr piped");

        let progress_task = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let (Some(reporter), Some(total)) = (progress, total_secs) {
                    if let Some(done_secs) = parse_progress_line(&line) {
                        if total > 0.0 {
                            reporter.report((done_secs / total * 100.0) as f32);
                        }
                    }
                }
            }
        };

        let stderr_task = async {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        };

        let (_, stderr_text) = tokio::join!(progress_task, stderr_task);

        let status = child.wait().await.context("Failed to wait for ffmpeg")?;
        if !status.success() {
            return Err(
                PipelineError::UpstreamFailure(stderr_text.trim().to_string()).into(),
            );
        }

        if let (Some(reporter), Some(_)) = (progress, total_secs) {
            reporter.report(100.0);
        }
        Ok(())
    }
}

/// `out_time_ms` is microseconds of output produced so far.
fn parse_progress_line(line: &str) -> Option<f64> {
    let value = line.strip_prefix("out_time_ms=")?;
    let micros: i64 = value.trim().parse().ok()?;
    Some(micros.max(0) as f64 / 1_000_000.0)
}

/// Derive the trim output name next to the input, embedding the cut bounds
/// with `:` flattened to `-`.
fn trim_output_path(input: &Path, start_secs: u64, end_secs: Option<u64>) -> PathBuf {
    let start_token = timecode::format(start_secs).replace(':', "-");
    let suffix = match end_secs {
        Some(end) => format!(
            "-cut-{}-{}",
            start_token,
            timecode::format(end).replace(':', "-")
        ),
        None => format!("-cut-{}", start_token),
    };
    sibling_output(input, &suffix, "mp3")
}

fn sibling_output(input: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    let name = format!("{}{}.{}", stem, suffix, extension);
    match input.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trim_rejects_invalid_range_without_invoking_engine() {
        // A nonexistent binary would fail with a spawn error; InvalidRange
        // proves the engine was never invoked.
        let transcoder = Transcoder::new("ffmpeg-that-does-not-exist", "ffprobe-missing");
        let input = PathBuf::from("song.mp3");

        for (start, end) in [(30, 30), (30, 10)] {
            let err = transcoder
                .trim(&input, start, Some(end), None)
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<crate::PipelineError>(),
                Some(crate::PipelineError::InvalidRange)
            ));
        }
    }

    #[tokio::test]
    async fn test_merge_rejects_short_input_lists() {
        let transcoder = Transcoder::new("ffmpeg-that-does-not-exist", "ffprobe-missing");
        let err = transcoder
            .merge(&[PathBuf::from("a.mp3")], Path::new("."))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least two"));
    }

    #[test]
    fn test_trim_output_naming() {
        let out = trim_output_path(Path::new("/music/song.mp3"), 30, Some(80));
        assert_eq!(out, PathBuf::from("/music/song-cut-00-30-01-20.mp3"));

        let out = trim_output_path(Path::new("song.mp3"), 3600, None);
        assert_eq!(out, PathBuf::from("song-cut-01-00-00.mp3"));
    }

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(parse_progress_line("out_time_ms=3000000"), Some(3.0));
        assert_eq!(parse_progress_line("out_time_ms=-9223372036854775808"), Some(0.0));
        assert_eq!(parse_progress_line("frame=42"), None);
        assert_eq!(parse_progress_line("progress=end"), None);
    }

    #[test]
    fn test_progress_throttle_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(3));
        let t0 = Instant::now();
        assert!(throttle.ready_at(t0));
        assert!(!throttle.ready_at(t0 + Duration::from_secs(1)));
        assert!(!throttle.ready_at(t0 + Duration::from_millis(2999)));
        assert!(throttle.ready_at(t0 + Duration::from_secs(3)));
        assert!(!throttle.ready_at(t0 + Duration::from_secs(4)));
    }
}
