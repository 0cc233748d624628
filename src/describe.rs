//! Spoken captions for image attachments.
//!
//! An `ImageDescriber` turns an attachment into a short caption through an
//! image-captioning inference endpoint. `CachedDescriber` memoizes captions
//! per image URL; failures are not cached and fall back to the plain
//! attachment placeholder.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ImageConfig;
use crate::error::NarrationError;
use crate::model::AttachmentRef;

#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Caption for the attachment, or `None` when none could be produced.
    async fn describe(&self, attachment: &AttachmentRef) -> Option<String>;
}

#[derive(Serialize)]
struct CaptionRequest<'a> {
    inputs: &'a str,
}

#[derive(Deserialize)]
struct CaptionResult {
    #[serde(default)]
    generated_text: String,
}

/// Captions through an HTTP inference endpoint taking `{"inputs": url}` and
/// answering `[{"generated_text": "..."}]`.
pub struct HttpImageDescriber {
    client: Client,
    endpoint: String,
    token: String,
    media_host: String,
}

impl HttpImageDescriber {
    pub fn new(config: &ImageConfig, token: String) -> Result<Self, NarrationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NarrationError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token,
            media_host: config.media_host.clone(),
        })
    }

    /// Build from config when captions are switched on and a token is
    /// available (config first, then `HF_TOKEN`).
    pub fn from_config(config: &ImageConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("HF_TOKEN").ok().filter(|t| !t.trim().is_empty()));
        let Some(token) = token else {
            warn!("Image captions enabled but no token configured, using plain attachment labels");
            return None;
        };

        match Self::new(config, token) {
            Ok(describer) => {
                info!("Image captions via {}", config.endpoint);
                Some(describer)
            }
            Err(e) => {
                warn!("Image captions unavailable: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl ImageDescriber for HttpImageDescriber {
    async fn describe(&self, attachment: &AttachmentRef) -> Option<String> {
        let image_url = attachment.url(&self.media_host);
        debug!("Requesting caption for {image_url}");

        let resp = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&CaptionRequest { inputs: &image_url })
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Image caption request failed: {e}");
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!("Image caption failed: HTTP {}", resp.status().as_u16());
            return None;
        }

        match resp.json::<Vec<CaptionResult>>().await {
            Ok(results) => Some(caption_from(results)),
            Err(e) => {
                warn!("Unreadable caption response: {e}");
                None
            }
        }
    }
}

fn caption_from(results: Vec<CaptionResult>) -> String {
    results
        .into_iter()
        .map(|r| r.generated_text.trim().to_string())
        .find(|t| !t.is_empty())
        .unwrap_or_else(|| "Image could not be described".to_string())
}

/// Memoizes successful captions by image URL.
pub struct CachedDescriber<D> {
    inner: D,
    media_host: String,
    cache: Mutex<HashMap<String, String>>,
}

impl<D: ImageDescriber> CachedDescriber<D> {
    pub fn new(inner: D, media_host: impl Into<String>) -> Self {
        Self {
            inner,
            media_host: media_host.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl<D: ImageDescriber> ImageDescriber for CachedDescriber<D> {
    async fn describe(&self, attachment: &AttachmentRef) -> Option<String> {
        let key = attachment.url(&self.media_host);
        if let Some(caption) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Some(caption.clone());
        }

        let caption = self.inner.describe(attachment).await?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, caption.clone());
        Some(caption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        answer: Option<&'static str>,
    }

    #[async_trait]
    impl ImageDescriber for Counting {
        async fn describe(&self, _: &AttachmentRef) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.map(String::from)
        }
    }

    fn png(timestamp: u64) -> AttachmentRef {
        AttachmentRef {
            board: "g".into(),
            timestamp,
            extension: ".png".into(),
        }
    }

    #[tokio::test]
    async fn captions_are_memoized_per_image() {
        let cached = CachedDescriber::new(
            Counting {
                calls: AtomicUsize::new(0),
                answer: Some("a cat on a keyboard"),
            },
            "https://i.4cdn.org",
        );

        for _ in 0..3 {
            assert_eq!(cached.describe(&png(1)).await.as_deref(), Some("a cat on a keyboard"));
        }
        cached.describe(&png(2)).await;
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached(), 2);
    }

    #[tokio::test]
    async fn failures_are_retried_next_time() {
        let cached = CachedDescriber::new(
            Counting {
                calls: AtomicUsize::new(0),
                answer: None,
            },
            "https://i.4cdn.org",
        );
        assert_eq!(cached.describe(&png(1)).await, None);
        assert_eq!(cached.describe(&png(1)).await, None);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached(), 0);
    }

    #[test]
    fn empty_generated_text_gets_a_generic_caption() {
        let parsed: Vec<CaptionResult> = serde_json::from_str(r#"[{"generated_text": "  "}]"#).unwrap();
        assert_eq!(caption_from(parsed), "Image could not be described");

        let parsed: Vec<CaptionResult> =
            serde_json::from_str(r#"[{"generated_text": "a dog in the snow"}]"#).unwrap();
        assert_eq!(caption_from(parsed), "a dog in the snow");
    }

    #[test]
    fn captions_need_the_switch_and_a_token() {
        assert!(HttpImageDescriber::from_config(&ImageConfig::default()).is_none());

        let config = ImageConfig {
            enabled: true,
            token: Some("hf_test".into()),
            ..ImageConfig::default()
        };
        assert!(HttpImageDescriber::from_config(&config).is_some());
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_no_caption() {
        let config = ImageConfig {
            enabled: true,
            endpoint: "http://127.0.0.1:9/caption".into(),
            timeout_secs: 2,
            ..ImageConfig::default()
        };
        let describer = HttpImageDescriber::new(&config, "hf_test".into()).unwrap();
        assert_eq!(describer.describe(&png(1)).await, None);
    }
}
