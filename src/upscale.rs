use crate::http::build_client;
use async_trait::async_trait;
use image::ImageReader;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::io::Cursor;
use thiserror::Error;
use tracing::{info, warn};

/// Provider-side cap on how large a submitted file may be (45 MB).
pub const MAX_FILE_BYTES: u64 = 45 * 1024 * 1024;
/// Largest edge the provider accepts as an upscale target.
pub const MAX_DIMENSION: u32 = 4096;

static TARGET_PX: Lazy<u32> = Lazy::new(|| {
    std::env::var("UPSCALE_TARGET_PX")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(4096)
});

#[derive(Debug, Error)]
pub enum UpscaleError {
    #[error("missing upscale provider credentials in env")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("could not decode image: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ImageProbe {
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait UpscaleProvider: Send + Sync {
    async fn upscale(&self, image_url: &str, scale: u32) -> Result<String, UpscaleError>;
    async fn probe(&self, image_url: &str) -> Result<ImageProbe, UpscaleError>;
    async fn file_size(&self, image_url: &str) -> Result<Option<u64>, UpscaleError>;
}

#[derive(Debug, Clone)]
pub struct UpscaleConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl UpscaleConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("UPSCALE_BASE_URL")
                .unwrap_or_else(|_| "https://api.developer.pixelcut.ai".into()),
            api_key: std::env::var("UPSCALE_API_KEY").ok(),
        }
    }
}

#[derive(Clone)]
pub struct PixelcutClient {
    http: Client,
    config: UpscaleConfig,
}

#[derive(Debug, Deserialize)]
struct UpscaleResponse {
    result_url: String,
}

impl PixelcutClient {
    pub fn new(config: UpscaleConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(UpscaleConfig::from_env())
    }

    fn require_key(&self) -> Result<&str, UpscaleError> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(UpscaleError::MissingCredentials)
    }
}

#[async_trait]
impl UpscaleProvider for PixelcutClient {
    async fn upscale(&self, image_url: &str, scale: u32) -> Result<String, UpscaleError> {
        let key = self.require_key()?;
        let started = std::time::Instant::now();
        let response = self
            .http
            .post(format!("{}/v1/upscale", self.config.base_url))
            .header("X-API-KEY", key)
            .json(&json!({ "image_url": image_url, "scale": scale }))
            .send()
            .await
            .map_err(|err| UpscaleError::Request(err.to_string()))?;
        crate::metrics::provider_call("upscale", started.elapsed().as_millis());

        if !response.status().is_success() {
            return Err(UpscaleError::Request(format!("HTTP {}", response.status())));
        }

        let payload: UpscaleResponse = response
            .json()
            .await
            .map_err(|err| UpscaleError::Deserialize(err.to_string()))?;
        Ok(payload.result_url)
    }

    async fn probe(&self, image_url: &str) -> Result<ImageProbe, UpscaleError> {
        let response = self
            .http
            .get(image_url)
            .send()
            .await
            .map_err(|err| UpscaleError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(UpscaleError::Request(format!("HTTP {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| UpscaleError::Request(err.to_string()))?;
        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|err| UpscaleError::Decode(err.to_string()))?
            .into_dimensions()
            .map_err(|err| UpscaleError::Decode(err.to_string()))?;
        Ok(ImageProbe { width, height })
    }

    async fn file_size(&self, image_url: &str) -> Result<Option<u64>, UpscaleError> {
        let response = self
            .http
            .head(image_url)
            .send()
            .await
            .map_err(|err| UpscaleError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(UpscaleError::Request(format!("HTTP {}", response.status())));
        }

        Ok(response.content_length())
    }
}

pub fn target_px_from_env() -> u32 {
    *TARGET_PX
}

/// Per-pass scale factor: enough to reach the target in one hop when the
/// provider allows it, clamped to the 2..=4 range the provider supports.
pub fn scale_for(current_edge: u32, target: u32) -> u32 {
    if current_edge == 0 {
        return 2;
    }
    let needed = target.div_ceil(current_edge);
    needed.clamp(2, 4)
}

/// Grow the image until its longest edge reaches `target` or a provider
/// limit stops us. Oversized outputs keep the last valid URL instead of
/// failing the whole pass.
pub async fn upscale_to_target(
    provider: &dyn UpscaleProvider,
    image_url: &str,
    target: u32,
) -> Result<String, UpscaleError> {
    let probe = provider.probe(image_url).await?;
    let mut current_edge = probe.width.max(probe.height);
    let mut current_url = image_url.to_string();

    while current_edge < target && current_edge < MAX_DIMENSION {
        let scale = scale_for(current_edge, target);
        let candidate = provider.upscale(&current_url, scale).await?;
        if let Some(bytes) = provider.file_size(&candidate).await?
            && bytes > MAX_FILE_BYTES
        {
            warn!(
                target = "printmuse.upscale",
                bytes, "upscaled file exceeds size cap; keeping previous pass"
            );
            break;
        }
        current_url = candidate;
        current_edge = current_edge.saturating_mul(scale);
    }

    Ok(current_url)
}

/// Fulfillment never fails on upscale trouble. Returns the best URL we
/// have plus whether an upscaled rendition actually replaced the input.
pub async fn best_effort(provider: &dyn UpscaleProvider, image_url: &str) -> (String, bool) {
    match upscale_to_target(provider, image_url, target_px_from_env()).await {
        Ok(url) => {
            let upscaled = url != image_url;
            if upscaled {
                info!(target = "printmuse.upscale", "print file upscaled");
            }
            (url, upscaled)
        }
        Err(err) => {
            warn!(
                target = "printmuse.upscale",
                error = %err,
                "upscale failed; submitting original image"
            );
            (image_url.to_string(), false)
        }
    }
}
