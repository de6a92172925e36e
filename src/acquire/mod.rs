//! URL acquisition through the external extraction engine (yt-dlp): probe,
//! bounded-time audio download, and single-result search.

use anyhow::Context;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::utils::sanitize_filename;
use crate::{timecode, PipelineError, Result};

/// Metadata reported by the engine before any download happens.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub title: Option<String>,
    pub duration_secs: Option<u64>,
    pub webpage_url: Option<String>,
    pub uploader: Option<String>,
}

/// Single best search hit with a pre-rendered reply message.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub duration_secs: Option<u64>,
    pub duration: String,
    pub uploader: Option<String>,
    pub message: String,
}

/// Audio downloader wrapping yt-dlp.
#[derive(Debug, Clone)]
pub struct Downloader {
    yt_dlp_path: String,
    ffmpeg_path: String,
    work_dir: PathBuf,
    cookies_path: Option<PathBuf>,
    deadline: Duration,
}

impl Downloader {
    pub fn new(
        yt_dlp_path: impl Into<String>,
        ffmpeg_path: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        cookies_path: Option<PathBuf>,
        deadline: Duration,
    ) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            ffmpeg_path: ffmpeg_path.into(),
            work_dir: work_dir.into(),
            cookies_path,
            deadline,
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> Result<bool> {
        let output = Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Ok(matches!(output, Ok(out) if out.status.success()))
    }

    /// Fetch source metadata without downloading anything.
    ///
    /// The caller runs the duration guard on the result before committing to
    /// a download.
    pub async fn probe(&self, url: &str) -> Result<SourceInfo> {
        tracing::debug!("Probing source info for: {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args(["--dump-json", "--no-playlist", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(
                PipelineError::UpstreamFailure(format!("yt-dlp failed: {}", error.trim())).into(),
            );
        }

        let info: Value = serde_json::from_slice(&output.stdout)?;
        Ok(parse_source_info(&info))
    }

    /// Download best-quality audio as mp3 at 192 kbps.
    ///
    /// Stale artifacts from a prior failed run are swept before the engine is
    /// invoked so a late-arriving file from an abandoned invocation never
    /// contaminates this request. The invocation races a fixed deadline; on
    /// expiry the engine process is abandoned rather than killed, and anything
    /// it writes afterwards is discarded by the next request's sweep.
    pub async fn download_audio(&self, url: &str) -> Result<Vec<PathBuf>> {
        tracing::info!("Starting download for: {}", url);

        self.sweep_stale()?;
        fs_err::create_dir_all(&self.work_dir)?;

        let staged_cookies = self.stage_cookies()?;

        let mut args: Vec<String> = vec![
            "--extract-audio".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--audio-quality".into(),
            "192K".into(),
            "--format".into(),
            "bestaudio/best".into(),
            "--output".into(),
            self.work_dir
                .join("%(title)s.%(ext)s")
                .to_string_lossy()
                .into_owned(),
            "--ffmpeg-location".into(),
            self.ffmpeg_path.clone(),
            "--no-playlist".into(),
        ];
        if let Some(cookies) = &staged_cookies {
            args.push("--cookies".into());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args.push(url.to_string());

        tracing::info!("Running yt-dlp...");
        let mut command = Command::new(&self.yt_dlp_path);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let raced = with_deadline(self.deadline, async {
            command.output().await.context("Failed to run yt-dlp")
        })
        .await;

        // The ephemeral credential copy is removed whatever happened above.
        if let Some(cookies) = staged_cookies {
            if let Err(e) = fs_err::remove_file(&cookies) {
                tracing::warn!("Failed to delete temp cookies file {}: {}", cookies.display(), e);
            }
        }

        let output = raced?;
        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(
                PipelineError::UpstreamFailure(format!("yt-dlp failed: {}", error.trim())).into(),
            );
        }

        let files = mp3_files(&self.work_dir)?;
        if files.is_empty() {
            return Err(PipelineError::NoArtifactProduced.into());
        }
        tracing::info!("Downloaded {} file(s)", files.len());

        let renamed = sanitize_artifacts(files)?;
        Ok(renamed)
    }

    /// Look up the single best match for a free-text query.
    pub async fn search(&self, query: &str) -> Result<Option<SearchHit>> {
        tracing::debug!("Searching for: {}", query);

        let target = format!("ytsearch1:{}", query);
        let output = Command::new(&self.yt_dlp_path)
            .args(["--dump-single-json", "--no-playlist", &target])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(
                PipelineError::UpstreamFailure(format!("yt-dlp failed: {}", error.trim())).into(),
            );
        }

        let result: Value = serde_json::from_slice(&output.stdout)?;
        Ok(parse_search_hit(&result))
    }

    /// Remove leftover artifacts sharing the output extension before a new
    /// engine invocation.
    pub fn sweep_stale(&self) -> Result<()> {
        if !self.work_dir.exists() {
            return Ok(());
        }
        let stale = mp3_files(&self.work_dir)?;
        if !stale.is_empty() {
            tracing::debug!("Removing {} stale file(s)", stale.len());
        }
        for file in stale {
            fs_err::remove_file(&file)?;
        }
        Ok(())
    }

    /// Stage a process-local ephemeral copy of the configured credential.
    fn stage_cookies(&self) -> Result<Option<PathBuf>> {
        let Some(source) = &self.cookies_path else {
            return Ok(None);
        };
        let staged = std::env::temp_dir().join(format!("cookies-{}.txt", uuid::Uuid::new_v4()));
        tracing::debug!("Copying cookies to temporary file: {}", staged.display());
        fs_err::copy(source, &staged).context("Failed to stage cookies file")?;
        Ok(Some(staged))
    }
}

/// Race an operation against the acquisition deadline.
async fn with_deadline<T>(
    deadline: Duration,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::AcquisitionTimeout(deadline.as_secs()).into()),
    }
}

/// List produced mp3 artifacts in a stable order.
fn mp3_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs_err::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("mp3"))
                .unwrap_or(false)
        })
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Rename each artifact whose sanitized name differs from its current name.
fn sanitize_artifacts(files: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut renamed = Vec::with_capacity(files.len());
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let safe = sanitize_filename(&name);
        if safe != name && !safe.is_empty() {
            let target = match file.parent() {
                Some(parent) => parent.join(&safe),
                None => PathBuf::from(&safe),
            };
            tracing::debug!("Renaming {} -> {}", name, safe);
            fs_err::rename(&file, &target)?;
            renamed.push(target);
        } else {
            renamed.push(file);
        }
    }
    Ok(renamed)
}

fn parse_source_info(info: &Value) -> SourceInfo {
    SourceInfo {
        title: info["title"].as_str().map(|s| s.to_string()),
        duration_secs: info["duration"].as_f64().map(|d| d as u64),
        webpage_url: info["webpage_url"].as_str().map(|s| s.to_string()),
        uploader: info["uploader"].as_str().map(|s| s.to_string()),
    }
}

fn parse_search_hit(result: &Value) -> Option<SearchHit> {
    let first = result["entries"].as_array()?.first()?;

    let url = first["webpage_url"].as_str()?.to_string();
    let title = first["title"].as_str()?.to_string();
    let uploader = first["uploader"].as_str().map(|s| s.to_string());
    let duration_secs = first["duration"].as_f64().map(|d| d as u64);
    let duration = duration_secs
        .map(timecode::format)
        .unwrap_or_else(|| "Unknown".to_string());

    let mut message = format!("🎵 *{}*\n⌛ Duration: {}\n", title, duration);
    if let Some(name) = &uploader {
        message.push_str(&format!("👤 Uploader: {}\n", name));
    }
    message.push_str(&format!("🔗 [Watch on YouTube]({})", url));

    Some(SearchHit {
        url,
        title,
        duration_secs,
        duration,
        uploader,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn downloader(work_dir: &Path) -> Downloader {
        Downloader::new(
            "yt-dlp",
            "ffmpeg",
            work_dir,
            None,
            Duration::from_secs(600),
        )
    }

    #[test]
    fn test_sweep_stale_removes_only_mp3s() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.mp3"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"x").unwrap();

        downloader(dir.path()).sweep_stale().unwrap();

        assert!(!dir.path().join("old.mp3").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn test_sanitize_artifacts_renames_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let dirty = dir.path().join("what? really*.mp3");
        let clean = dir.path().join("clean.mp3");
        fs::write(&dirty, b"x").unwrap();
        fs::write(&clean, b"x").unwrap();

        let renamed = sanitize_artifacts(vec![clean.clone(), dirty.clone()]).unwrap();

        assert!(renamed.contains(&clean));
        assert!(renamed.contains(&dir.path().join("what really.mp3")));
        assert!(!dirty.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_acquisition_timeout() {
        let never = std::future::pending::<Result<()>>();
        let err = with_deadline(Duration::from_secs(600), never)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::AcquisitionTimeout(600))
        ));
    }

    #[test]
    fn test_parse_source_info() {
        let info = serde_json::json!({
            "title": "Some Song",
            "duration": 215.3,
            "webpage_url": "https://youtube.com/watch?v=abc",
            "uploader": "Somebody",
        });
        let parsed = parse_source_info(&info);
        assert_eq!(parsed.title.as_deref(), Some("Some Song"));
        assert_eq!(parsed.duration_secs, Some(215));
        assert_eq!(parsed.uploader.as_deref(), Some("Somebody"));
    }

    #[test]
    fn test_parse_search_hit() {
        let result = serde_json::json!({
            "entries": [{
                "webpage_url": "https://youtube.com/watch?v=abc",
                "title": "Hit",
                "duration": 95.0,
                "uploader": "Channel",
            }],
        });
        let hit = parse_search_hit(&result).unwrap();
        assert_eq!(hit.url, "https://youtube.com/watch?v=abc");
        assert_eq!(hit.duration, "01:35");
        assert!(hit.message.contains("*Hit*"));
        assert!(hit.message.contains("Channel"));

        assert!(parse_search_hit(&serde_json::json!({"entries": []})).is_none());
        assert!(parse_search_hit(&serde_json::json!({})).is_none());
    }
}
