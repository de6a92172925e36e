//! Speech-to-text over a multipart HTTP API.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

use crate::config::TranscriptionConfig;
use crate::{PipelineError, Result};

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for the transcription endpoint.
///
/// Sends the audio file plus a fixed model identifier; any non-2xx response
/// is a hard failure.
pub struct Transcriber {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl Transcriber {
    /// Build a client from config; `None` when no API key is configured.
    pub fn from_config(config: &TranscriptionConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
        })
    }

    /// Transcribe an audio file to text.
    pub async fn transcribe(&self, path: &Path) -> Result<String> {
        tracing::info!("Transcribing {}", path.display());

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read audio file {}", path.display()))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        if !response.status().is_success() {
            return Err(PipelineError::UpstreamFailure(format!(
                "Transcription failed: {}",
                response.status()
            ))
            .into());
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;
        Ok(body.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_response_shape() {
        let body: TranscriptionResponse =
            serde_json::from_str(r#"{"text": "hello there", "extra": 1}"#).unwrap();
        assert_eq!(body.text, "hello there");
    }

    #[test]
    fn test_client_requires_an_api_key() {
        let mut config = Config::default().transcription;
        config.api_key = None;
        assert!(Transcriber::from_config(&config).is_none());

        config.api_key = Some("sk-test".to_string());
        assert!(Transcriber::from_config(&config).is_some());
    }
}
