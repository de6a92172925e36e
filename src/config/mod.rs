use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// External tool locations
    pub tools: ToolsConfig,

    /// Upload/duration ceilings and deadlines
    pub limits: LimitsConfig,

    /// Speech-to-text API settings
    pub transcription: TranscriptionConfig,

    /// Short-form-video API settings
    pub short_video: ShortVideoConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// yt-dlp executable
    pub yt_dlp_path: String,

    /// ffmpeg executable
    pub ffmpeg_path: String,

    /// ffprobe executable
    pub ffprobe_path: String,

    /// Optional cookies file handed to yt-dlp (staged as an ephemeral copy
    /// per invocation)
    pub cookies_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Upload ceiling in bytes
    pub max_upload_bytes: u64,

    /// Source duration ceiling in seconds, checked before download
    pub max_source_secs: u64,

    /// Extraction deadline in seconds
    pub acquisition_timeout_secs: u64,

    /// Minimum seconds between transcode progress updates
    pub progress_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Transcriptions endpoint URL
    pub api_url: String,

    /// Model identifier sent with every request
    pub model: String,

    /// Bearer token; falls back to TRACKSMITH_TRANSCRIPTION_KEY
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortVideoConfig {
    /// Video lookup endpoint
    pub video_api_url: String,

    /// Photo lookup endpoint
    pub photo_api_url: String,

    /// Author/info lookup endpoint
    pub info_api_url: String,

    /// API key pool, rotated on rate-limit responses; falls back to
    /// TRACKSMITH_SHORTVIDEO_KEYS (comma-separated)
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Working directory for extraction artifacts (defaults to a scratch dir)
    pub work_dir: Option<PathBuf>,

    /// Where the CLI delivery backend places finished artifacts
    pub out_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools: ToolsConfig {
                yt_dlp_path: "yt-dlp".to_string(),
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
                cookies_path: None,
            },
            limits: LimitsConfig {
                max_upload_bytes: 50 * 1024 * 1024,
                max_source_secs: 60 * 60,
                acquisition_timeout_secs: 600,
                progress_interval_secs: 3,
            },
            transcription: TranscriptionConfig {
                api_url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
                model: "whisper-1".to_string(),
                api_key: None,
            },
            short_video: ShortVideoConfig {
                video_api_url: "".to_string(),
                photo_api_url: "".to_string(),
                info_api_url: "".to_string(),
                api_keys: Vec::new(),
            },
            app: AppConfig {
                work_dir: None,
                out_dir: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content =
                fs_err::read_to_string(&config_path).context("Failed to read config file")?;

            let config: Config =
                serde_yaml::from_str(&content).context("Failed to parse config file")?;

            config.validate()?;
            config
        } else {
            let config = Self::default();
            config.save().await?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("tracksmith").join("config.yaml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.limits.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be positive");
        }
        if self.limits.acquisition_timeout_secs == 0 {
            anyhow::bail!("acquisition_timeout_secs must be positive");
        }
        if let Some(cookies) = &self.tools.cookies_path {
            if !cookies.exists() {
                anyhow::bail!("Configured cookies file does not exist: {}", cookies.display());
            }
        }
        Ok(())
    }

    /// Secrets come from the environment when not present in the file.
    fn apply_env_overrides(&mut self) {
        if self.transcription.api_key.is_none() {
            if let Ok(key) = std::env::var("TRACKSMITH_TRANSCRIPTION_KEY") {
                self.transcription.api_key = Some(key);
            }
        }
        if self.short_video.api_keys.is_empty() {
            if let Ok(keys) = std::env::var("TRACKSMITH_SHORTVIDEO_KEYS") {
                self.short_video.api_keys = keys
                    .split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect();
            }
        }
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  yt-dlp: {}", self.tools.yt_dlp_path);
        println!("  ffmpeg: {}", self.tools.ffmpeg_path);
        println!(
            "  Upload limit: {}",
            crate::utils::format_file_size(self.limits.max_upload_bytes)
        );
        println!(
            "  Source duration limit: {}",
            crate::timecode::format(self.limits.max_source_secs)
        );
        println!(
            "  Acquisition timeout: {}s",
            self.limits.acquisition_timeout_secs
        );
        println!(
            "  Transcription: {} ({})",
            self.transcription.api_url, self.transcription.model
        );
        println!(
            "  Short-video API keys: {}",
            self.short_video.api_keys.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_match_platform_ceilings() {
        let config = Config::default();
        assert_eq!(config.limits.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.limits.max_source_secs, 3600);
        assert_eq!(config.limits.acquisition_timeout_secs, 600);
        assert_eq!(config.limits.progress_interval_secs, 3);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.limits.max_upload_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.limits.max_upload_bytes, config.limits.max_upload_bytes);
        assert_eq!(parsed.transcription.model, "whisper-1");
    }
}
