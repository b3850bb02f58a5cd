use crate::imagegen::{GeneratedImage, ImageGenError, ImageGenerator};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Offline stand-in for the generation provider. Produces a deterministic-
/// looking placeholder URL without any network call.
pub struct FakeImageGenerator {
    latency: Duration,
}

impl FakeImageGenerator {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn from_env() -> Self {
        let latency_ms = std::env::var("FAKE_IMAGEGEN_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        Self::new(Duration::from_millis(latency_ms))
    }
}

impl Default for FakeImageGenerator {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl ImageGenerator for FakeImageGenerator {
    async fn generate(&self, _prompt: &str) -> Result<GeneratedImage, ImageGenError> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let seed: u32 = rand::rng().random();
        Ok(GeneratedImage {
            url: format!("https://images.printmuse.dev/generated/{seed:08x}.png"),
            image_id: Some(format!("fake-{seed:08x}")),
        })
    }
}
