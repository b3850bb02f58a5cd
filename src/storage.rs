use crate::http::build_client;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Object store for keeping a durable copy of generated art. Configured
/// entirely from env; absent config disables persistence.
#[derive(Debug, Clone)]
pub struct StorageClient {
    base_url: String,
    service_key: String,
    bucket: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

const SIGNED_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

impl StorageClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let bucket =
            std::env::var("SUPABASE_BUCKET").unwrap_or_else(|_| "print-images".to_string());
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket,
            http: build_client(),
        })
    }

    /// Downloads the image at `source_url` and stores a copy under a fresh
    /// object key. Returns a signed URL good for seven days.
    pub async fn persist_image(&self, source_url: &str) -> Result<String, StorageError> {
        let bytes = self
            .http
            .get(source_url)
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?
            .error_for_status()
            .map_err(|err| StorageError::Request(err.to_string()))?
            .bytes()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        let object_key = format!("generated/{}.png", Uuid::new_v4());
        let upload_url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, object_key
        );
        let response = self
            .http
            .post(upload_url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(bytes)
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        self.sign_url(&object_key).await
    }

    async fn sign_url(&self, object_key: &str) -> Result<String, StorageError> {
        let sign_url = format!(
            "{}/storage/v1/object/sign/{}/{}",
            self.base_url, self.bucket, object_key
        );
        let response = self
            .http
            .post(sign_url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .json(&serde_json::json!({ "expiresIn": SIGNED_URL_TTL_SECS }))
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: SignedUrlResponse = response
            .json()
            .await
            .map_err(|err| StorageError::Deserialize(err.to_string()))?;
        Ok(format!("{}/storage/v1{}", self.base_url, payload.signed_url))
    }
}

/// Copies the image into the bucket when storage is configured; otherwise
/// (or on any storage failure) the provider URL is used as-is.
pub async fn persist_or_passthrough(storage: Option<&StorageClient>, source_url: &str) -> String {
    match storage {
        Some(client) => match client.persist_image(source_url).await {
            Ok(url) => url,
            Err(err) => {
                warn!(
                    target = "printmuse.storage",
                    error = %err,
                    "image persistence failed; using provider URL"
                );
                source_url.to_string()
            }
        },
        None => source_url.to_string(),
    }
}
