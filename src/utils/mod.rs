use anyhow::Result;
use std::path::{Path, PathBuf};
use url::Url;

/// Validate a URL and return normalized version
pub fn validate_and_normalize_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    Ok(parsed.to_string())
}

/// Strip characters that are illegal in filesystem paths.
///
/// Removes `<>:"/\|?*` outright and trims surrounding whitespace; everything
/// else (unicode, spaces, dots) passes through unchanged so titles stay
/// recognizable.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Generate a unique temp filename with the given extension.
pub fn unique_filename(prefix: &str, extension: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    format!(
        "{}-{}-{}.{}",
        prefix,
        timestamp,
        &uuid::Uuid::new_v4().to_string()[..8],
        extension
    )
}

/// Stream a remote file to disk.
///
/// Used for fetching chat-platform file links; the caller registers `dest`
/// with its temp tracker before calling so the partial file is cleaned up if
/// the transfer fails mid-stream.
pub async fn download_to_file(url: &str, dest: &Path) -> Result<()> {
    use futures_util::StreamExt;
    use std::io::Write;

    tracing::debug!("Downloading {} -> {}", url, dest.display());

    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download file: HTTP {}", response.status());
    }

    let mut file = fs_err::File::create(dest)?;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
    }

    Ok(())
}

/// Fetch a file reference that may be a URL or a local path.
///
/// Local paths are copied so the caller always owns (and later deletes) the
/// result, never the user's original file.
pub async fn fetch_to_file(reference: &str, dest: &Path) -> Result<()> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        download_to_file(reference, dest).await
    } else {
        fs_err::copy(PathBuf::from(reference), dest)?;
        Ok(())
    }
}

/// Check if the current environment has required tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available("yt-dlp", "--version").await {
        missing.push("yt-dlp - required for URL extraction".to_string());
    }

    if !check_command_available("ffmpeg", "-version").await {
        missing.push("ffmpeg - required for trim, compress, and merge".to_string());
    }

    if !check_command_available("ffprobe", "-version").await {
        missing.push("ffprobe - required for duration probing".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_strips_illegal_chars() {
        assert_eq!(sanitize_filename("a<b>c:d\"e/f\\g|h?i*j.mp3"), "abcdefghij.mp3");
        assert_eq!(sanitize_filename("Song Title (live).mp3"), "Song Title (live).mp3");
        assert_eq!(sanitize_filename("  spaced  "), "spaced");
        assert_eq!(sanitize_filename("what? really?.mp3"), "what really.mp3");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(52428800), "50.0 MB");
    }

    #[test]
    fn test_unique_filename_shape() {
        let a = unique_filename("audio", "mp3");
        let b = unique_filename("audio", "mp3");
        assert!(a.starts_with("audio-"));
        assert!(a.ends_with(".mp3"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_and_normalize_url() {
        assert!(validate_and_normalize_url("https://example.com").is_ok());
        assert!(validate_and_normalize_url("http://example.com").is_ok());
        assert!(validate_and_normalize_url("ftp://example.com").is_err());
        assert!(validate_and_normalize_url("not-a-url").is_err());
    }

    #[tokio::test]
    async fn test_fetch_to_file_copies_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.mp3");
        let dest = dir.path().join("dest.mp3");
        std::fs::write(&src, b"abc").unwrap();

        fetch_to_file(src.to_str().unwrap(), &dest).await.unwrap();

        assert!(src.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
    }
}
