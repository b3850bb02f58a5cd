use crate::http::build_client;
use crate::printful::config::{PRINTFUL_API_KEY, ROOT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum PrintfulMockupError {
    #[error("missing print provider credentials in env")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Printable-area descriptor for one product: which placements each variant
/// supports and the pixel dimensions of each printfile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintfileDescriptor {
    pub variant_printfiles: Vec<VariantPrintfiles>,
    pub printfiles: Vec<Printfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantPrintfiles {
    pub variant_id: i64,
    // Key order follows the provider document; the first key is the one used.
    pub placements: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Printfile {
    pub printfile_id: i64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MockupTaskRequest {
    pub variant_ids: Vec<i64>,
    pub format: &'static str,
    pub files: Vec<MockupFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MockupFile {
    pub placement: String,
    pub image_url: String,
    pub position: PrintPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintPosition {
    pub area_width: u32,
    pub area_height: u32,
    pub width: u32,
    pub height: u32,
    pub top: u32,
    pub left: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockupTask {
    pub task_key: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockupTaskStatus {
    pub status: String,
    #[serde(default)]
    pub mockups: Vec<MockupResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockupResult {
    pub mockup_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

fn require_key() -> Result<&'static str, PrintfulMockupError> {
    let key = PRINTFUL_API_KEY.as_str();
    if key.is_empty() {
        return Err(PrintfulMockupError::MissingCredentials);
    }
    Ok(key)
}

pub async fn fetch_printfiles(product_id: i64) -> Result<PrintfileDescriptor, PrintfulMockupError> {
    let key = require_key()?;
    let client = build_client();
    let url = format!("{}/mockup-generator/printfiles/{}", *ROOT, product_id);
    let response = client
        .get(url)
        .bearer_auth(key)
        .send()
        .await
        .map_err(|err| PrintfulMockupError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(PrintfulMockupError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: Envelope<PrintfileDescriptor> = response
        .json()
        .await
        .map_err(|err| PrintfulMockupError::Deserialize(err.to_string()))?;
    Ok(payload.result)
}

pub async fn create_mockup_task(
    product_id: i64,
    request: &MockupTaskRequest,
) -> Result<MockupTask, PrintfulMockupError> {
    let key = require_key()?;
    let client = build_client();
    let url = format!("{}/mockup-generator/create-task/{}", *ROOT, product_id);
    let started = std::time::Instant::now();
    let response = client
        .post(url)
        .bearer_auth(key)
        .json(request)
        .send()
        .await
        .map_err(|err| PrintfulMockupError::Request(err.to_string()))?;
    crate::metrics::provider_call("printful", started.elapsed().as_millis());

    if !response.status().is_success() {
        return Err(PrintfulMockupError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: Envelope<MockupTask> = response
        .json()
        .await
        .map_err(|err| PrintfulMockupError::Deserialize(err.to_string()))?;
    Ok(payload.result)
}

pub async fn fetch_mockup_task(task_key: &str) -> Result<MockupTaskStatus, PrintfulMockupError> {
    let key = require_key()?;
    let client = build_client();
    let url = format!(
        "{}/mockup-generator/task?task_key={}",
        *ROOT,
        encode(task_key)
    );
    let response = client
        .get(url)
        .bearer_auth(key)
        .send()
        .await
        .map_err(|err| PrintfulMockupError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(PrintfulMockupError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: Envelope<MockupTaskStatus> = response
        .json()
        .await
        .map_err(|err| PrintfulMockupError::Deserialize(err.to_string()))?;
    Ok(payload.result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printfile_descriptor_keeps_placement_document_order() {
        let raw = r#"{
            "variant_printfiles": [
                {"variant_id": 9001, "placements": {"default": 101, "back": 102}}
            ],
            "printfiles": [
                {"printfile_id": 101, "width": 1800, "height": 2400}
            ]
        }"#;
        let descriptor: PrintfileDescriptor = serde_json::from_str(raw).unwrap();
        let first = descriptor.variant_printfiles[0]
            .placements
            .keys()
            .next()
            .unwrap();
        assert_eq!(first, "default");
        assert_eq!(descriptor.printfiles[0].width, 1800);
    }

    #[test]
    fn task_status_tolerates_missing_mockups() {
        let raw = r#"{"status":"pending"}"#;
        let status: MockupTaskStatus = serde_json::from_str(raw).unwrap();
        assert_eq!(status.status, "pending");
        assert!(status.mockups.is_empty());
    }
}
