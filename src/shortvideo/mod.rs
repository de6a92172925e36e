//! Short-form-video lookup API client.
//!
//! Resolves shortened post URLs through a single redirect, then queries the
//! video/photo lookup endpoints with an API key chosen round-robin from a
//! pool, advancing to the next key on a rate-limit response.

use anyhow::Context;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ShortVideoConfig;
use crate::{PipelineError, Result};

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0 Safari/537.36";

/// Round-robin cursor over the configured API keys.
#[derive(Debug, Default)]
pub struct KeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn current(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let index = self.cursor.load(Ordering::Relaxed) % self.keys.len();
        Some(&self.keys[index])
    }

    fn advance(&self) {
        self.cursor.fetch_add(1, Ordering::Relaxed);
    }
}

/// One lookup attempt either produced a value or hit a rate limit.
pub enum Attempt<T> {
    Done(T),
    RateLimited,
}

/// Run an operation under key rotation.
///
/// A rate-limited attempt advances the cursor and retries with the next key;
/// after `pool size` rate-limited attempts the lookup fails with
/// `RateLimitExhausted` - exactly pool-size attempts, no more. Any other
/// error propagates immediately.
pub async fn with_key_rotation<T, F, Fut>(pool: &KeyPool, mut op: F) -> Result<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    for _ in 0..pool.len() {
        let key = pool
            .current()
            .ok_or(PipelineError::RateLimitExhausted)?
            .to_string();
        match op(key).await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::RateLimited => {
                tracing::warn!("API key reached its limit, switching to the next key");
                pool.advance();
            }
        }
    }
    Err(PipelineError::RateLimitExhausted.into())
}

/// Kind of post a resolved URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    Video,
    Photo,
}

/// Result of resolving a shortened URL.
#[derive(Debug, Clone)]
pub struct ResolvedPost {
    pub final_url: String,
    pub post: Option<(PostKind, String)>,
}

/// Author metadata from the info endpoint.
#[derive(Debug, Clone)]
pub struct AuthorInfo {
    pub nick: String,
    pub cover_url: Option<String>,
    pub description: Option<String>,
}

pub struct ShortVideoClient {
    http: reqwest::Client,
    no_redirect: reqwest::Client,
    config: ShortVideoConfig,
    pool: KeyPool,
}

impl ShortVideoClient {
    /// Build a client from config; `None` when the lookup endpoints are not
    /// configured.
    pub fn from_config(config: &ShortVideoConfig) -> Option<Self> {
        if config.video_api_url.is_empty() || config.info_api_url.is_empty() {
            return None;
        }
        let http = reqwest::Client::builder()
            .user_agent(BROWSER_UA)
            .build()
            .ok()?;
        let no_redirect = reqwest::Client::builder()
            .user_agent(BROWSER_UA)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .ok()?;
        Some(Self {
            http,
            no_redirect,
            pool: KeyPool::new(config.api_keys.clone()),
            config: config.clone(),
        })
    }

    /// Follow one redirect to the canonical post URL and pull out the
    /// numeric post id.
    pub async fn resolve_short_url(&self, short_url: &str) -> ResolvedPost {
        let final_url = match self.no_redirect.get(short_url).send().await {
            Ok(response) => response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|l| l.to_str().ok())
                .map(|l| l.to_string())
                .unwrap_or_else(|| short_url.to_string()),
            Err(e) => {
                tracing::warn!("Failed to resolve redirects, using {}: {}", short_url, e);
                short_url.to_string()
            }
        };

        let post = extract_post_id(&final_url);
        ResolvedPost { final_url, post }
    }

    /// Look up a video post; `None` when the post has no playable video.
    pub async fn fetch_video(&self, url: &str) -> Result<Option<String>> {
        let clean_url = url.split('?').next().unwrap_or(url).to_string();

        with_key_rotation(&self.pool, |key| {
            let clean_url = clean_url.clone();
            async move {
                let response = self
                    .http
                    .get(&self.config.video_api_url)
                    .query(&[("url", clean_url.as_str())])
                    .header("X-PrimeAPI-Key", key)
                    .send()
                    .await
                    .context("Video lookup request failed")?;

                if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    return Ok(Attempt::RateLimited);
                }
                let body: Value = response.json().await?;
                if is_rate_limited_body(&body) {
                    return Ok(Attempt::RateLimited);
                }

                Ok(Attempt::Done(
                    body["play"].as_str().map(|s| s.to_string()),
                ))
            }
        })
        .await
    }

    /// Look up a photo post's image URLs.
    pub async fn fetch_photos(&self, post_id: &str) -> Result<Vec<String>> {
        with_key_rotation(&self.pool, |key| {
            let post_id = post_id.to_string();
            async move {
                let response = self
                    .http
                    .get(&self.config.photo_api_url)
                    .query(&[("postId", post_id.as_str())])
                    .header("X-PrimeAPI-Key", key)
                    .send()
                    .await
                    .context("Photo lookup request failed")?;

                if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    return Ok(Attempt::RateLimited);
                }
                let body: Value = response.json().await?;
                if is_rate_limited_body(&body) {
                    return Ok(Attempt::RateLimited);
                }

                Ok(Attempt::Done(parse_photo_urls(&body)))
            }
        })
        .await
    }

    /// Author/cover lookup, not behind the key pool.
    pub async fn fetch_author(&self, url: &str) -> Result<AuthorInfo> {
        let response = self
            .http
            .post(&self.config.info_api_url)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .context("Author lookup request failed")?;

        let body: Value = response.json().await?;
        if !body["status"].as_bool().unwrap_or(false) {
            let reason = body["error"]
                .as_str()
                .unwrap_or("Failed to fetch post info")
                .to_string();
            return Err(PipelineError::UpstreamFailure(reason).into());
        }

        let data = &body["data"];
        Ok(AuthorInfo {
            nick: data["nick"].as_str().unwrap_or("unknown").to_string(),
            cover_url: data["video_img"].as_str().map(|s| s.to_string()),
            description: data["video_info"].as_str().map(|s| s.to_string()),
        })
    }

    /// Download a media file with the browser-like user agent and a referer
    /// the CDN accepts.
    pub async fn download_media(&self, url: &str, dest: &std::path::Path) -> Result<()> {
        use futures_util::StreamExt;
        use std::io::Write;

        let response = self
            .http
            .get(url)
            .header(reqwest::header::REFERER, "https://www.tiktok.com/")
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("Failed to download media: HTTP {}", response.status());
        }

        let mut file = fs_err::File::create(dest)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?)?;
        }
        Ok(())
    }
}

fn is_rate_limited_body(body: &Value) -> bool {
    body["error"]
        .as_str()
        .map(|e| e.contains("limit"))
        .unwrap_or(false)
}

fn parse_photo_urls(body: &Value) -> Vec<String> {
    body["itemInfo"]["itemStruct"]["imagePost"]["images"]
        .as_array()
        .map(|images| {
            images
                .iter()
                .filter_map(|img| img["imageURL"]["urlList"].as_array())
                .filter_map(|urls| urls.first())
                .filter_map(|url| url.as_str())
                .map(|url| url.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Pull the numeric post id out of a `/video/<id>` or `/photo/<id>` path.
pub fn extract_post_id(url: &str) -> Option<(PostKind, String)> {
    for (kind, marker) in [(PostKind::Video, "/video/"), (PostKind::Photo, "/photo/")] {
        if let Some(index) = url.find(marker) {
            let digits: String = url[index + marker.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() {
                return Some((kind, digits));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_post_id() {
        assert_eq!(
            extract_post_id("https://www.tiktok.com/@user/video/7234567890123456789"),
            Some((PostKind::Video, "7234567890123456789".to_string()))
        );
        assert_eq!(
            extract_post_id("https://www.tiktok.com/@user/photo/123?lang=en"),
            Some((PostKind::Photo, "123".to_string()))
        );
        assert_eq!(extract_post_id("https://www.tiktok.com/@user"), None);
        assert_eq!(extract_post_id("https://www.tiktok.com/@user/video/abc"), None);
    }

    #[tokio::test]
    async fn test_rotation_exhausts_after_exactly_pool_size_attempts() {
        let pool = KeyPool::new(vec!["k1".into(), "k2".into(), "k3".into()]);
        let attempts = AtomicUsize::new(0);

        let err = with_key_rotation::<(), _, _>(&pool, |_key| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { Ok(Attempt::RateLimited) }
        })
        .await
        .unwrap_err();

        assert_eq!(attempts.load(Ordering::Relaxed), 3);
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::RateLimitExhausted)
        ));
    }

    #[tokio::test]
    async fn test_rotation_advances_past_limited_keys() {
        let pool = KeyPool::new(vec!["k1".into(), "k2".into()]);

        let hit = with_key_rotation(&pool, |key| async move {
            if key == "k1" {
                Ok(Attempt::RateLimited)
            } else {
                Ok(Attempt::Done(key))
            }
        })
        .await
        .unwrap();

        assert_eq!(hit, "k2");
    }

    #[tokio::test]
    async fn test_rotation_with_empty_pool_is_exhausted_without_attempts() {
        let pool = KeyPool::new(Vec::new());
        let attempts = AtomicUsize::new(0);

        let err = with_key_rotation::<(), _, _>(&pool, |_key| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { Ok(Attempt::RateLimited) }
        })
        .await
        .unwrap_err();

        assert_eq!(attempts.load(Ordering::Relaxed), 0);
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::RateLimitExhausted)
        ));
    }

    #[tokio::test]
    async fn test_rotation_propagates_hard_errors_immediately() {
        let pool = KeyPool::new(vec!["k1".into(), "k2".into()]);
        let attempts = AtomicUsize::new(0);

        let err = with_key_rotation::<(), _, _>(&pool, |_key| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { anyhow::bail!("connection refused") }
        })
        .await
        .unwrap_err();

        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_rate_limited_body_detection() {
        assert!(is_rate_limited_body(&serde_json::json!({
            "error": "monthly limit reached"
        })));
        assert!(!is_rate_limited_body(&serde_json::json!({
            "error": "bad url"
        })));
        assert!(!is_rate_limited_body(&serde_json::json!({ "play": "x" })));
    }

    #[test]
    fn test_parse_photo_urls() {
        let body = serde_json::json!({
            "itemInfo": { "itemStruct": { "imagePost": { "images": [
                { "imageURL": { "urlList": ["https://cdn/a.jpg", "https://cdn/a2.jpg"] } },
                { "imageURL": { "urlList": ["https://cdn/b.jpg"] } },
                { "imageURL": { "urlList": [] } },
            ] } } }
        });
        assert_eq!(
            parse_photo_urls(&body),
            vec!["https://cdn/a.jpg".to_string(), "https://cdn/b.jpg".to_string()]
        );
        assert!(parse_photo_urls(&serde_json::json!({})).is_empty());
    }
}
