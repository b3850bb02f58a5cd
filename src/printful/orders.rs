use crate::http::build_client;
use crate::printful::config::{PRINTFUL_API_KEY, ROOT};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrintfulOrderError {
    #[error("missing print provider credentials in env")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecipient {
    pub name: String,
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state_code: Option<String>,
    pub country_code: String,
    pub zip: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub recipient: OrderRecipient,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub variant_id: i64,
    pub quantity: u32,
    pub files: Vec<OrderFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFile {
    pub url: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub placement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedOrder {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

pub async fn create_order(request: &OrderRequest) -> Result<SubmittedOrder, PrintfulOrderError> {
    let key = PRINTFUL_API_KEY.as_str();
    if key.is_empty() {
        return Err(PrintfulOrderError::MissingCredentials);
    }
    let client = build_client();
    let url = format!("{}/orders", *ROOT);
    let started = std::time::Instant::now();
    let response = client
        .post(url)
        .bearer_auth(key)
        .json(request)
        .send()
        .await
        .map_err(|err| PrintfulOrderError::Request(err.to_string()))?;
    crate::metrics::provider_call("printful", started.elapsed().as_millis());

    if !response.status().is_success() {
        return Err(PrintfulOrderError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: Envelope<SubmittedOrder> = response
        .json()
        .await
        .map_err(|err| PrintfulOrderError::Deserialize(err.to_string()))?;
    Ok(payload.result)
}
