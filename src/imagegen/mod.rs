pub mod fake;
pub mod openai;

pub use fake::FakeImageGenerator;
pub use openai::{ImageGenConfig, OpenAiImageClient};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageGenError {
    #[error("missing image generation credentials in env")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub url: String,
    pub image_id: Option<String>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ImageGenError>;
}

/// Provider selection is configuration, not prompt inspection: set
/// `IMAGEGEN_PROVIDER=fake` for offline development and demos.
pub fn provider_from_env() -> Arc<dyn ImageGenerator> {
    match std::env::var("IMAGEGEN_PROVIDER").as_deref() {
        Ok("fake") => Arc::new(FakeImageGenerator::from_env()),
        _ => Arc::new(OpenAiImageClient::new(ImageGenConfig::from_env())),
    }
}
