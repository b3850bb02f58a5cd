use crate::http::build_client;
use crate::imagegen::{GeneratedImage, ImageGenError, ImageGenerator};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct ImageGenConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub size: String,
}

impl ImageGenConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("IMAGEGEN_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: std::env::var("IMAGEGEN_API_KEY").ok(),
            model: std::env::var("IMAGEGEN_MODEL").unwrap_or_else(|_| "dall-e-3".into()),
            size: std::env::var("IMAGEGEN_SIZE").unwrap_or_else(|_| "1024x1024".into()),
        }
    }
}

pub struct OpenAiImageClient {
    http: Client,
    config: ImageGenConfig,
}

impl OpenAiImageClient {
    pub fn new(config: ImageGenConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageClient {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ImageGenError> {
        let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(ImageGenError::MissingCredentials);
        };

        let body = GenerationRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            n: 1,
            size: self.config.size.clone(),
        };

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(format!(
                "{}/images/generations",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ImageGenError::Request(err.to_string()))?;
        crate::metrics::provider_call("imagegen", started.elapsed().as_millis());

        if !response.status().is_success() {
            return Err(ImageGenError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: GenerationResponse = response
            .json()
            .await
            .map_err(|err| ImageGenError::InvalidResponse(err.to_string()))?;

        let image_id = (payload.created != 0).then(|| payload.created.to_string());
        let first = payload
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ImageGenError::InvalidResponse("empty data array".into()))?;

        Ok(GeneratedImage {
            url: first.url,
            image_id,
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerationRequest {
    model: String,
    prompt: String,
    n: u8,
    size: String,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    created: i64,
    data: Vec<GenerationData>,
}

#[derive(Debug, Deserialize)]
struct GenerationData {
    url: String,
    #[allow(dead_code)]
    #[serde(default)]
    revised_prompt: Option<String>,
}
