use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerateImageAction {
    Start,
    Status,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageRequest {
    pub action: GenerateImageAction,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGenerationResponse {
    pub job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CatalogAction {
    #[serde(rename = "getCatalogItems")]
    GetCatalogItems,
    #[serde(rename = "getProductDetails")]
    GetProductDetails,
    #[serde(rename = "generateMockup")]
    GenerateMockup,
    #[serde(rename = "getMockupResult")]
    GetMockupResult,
    #[serde(rename = "createOrder")]
    CreateOrder,
}

#[derive(Debug, Deserialize)]
pub struct CatalogProxyRequest {
    pub action: CatalogAction,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    pub product_id: i64,
    pub variant_id: i64,
    pub product_title: String,
    pub selling_price: f64,
    pub mockup_url: String,
    pub original_image_url: String,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutCompleteRequest {
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_action_uses_wire_names() {
        let parsed: CatalogProxyRequest =
            serde_json::from_str(r#"{"action":"getCatalogItems"}"#).unwrap();
        assert_eq!(parsed.action, CatalogAction::GetCatalogItems);
        assert!(parsed.data.is_null());
    }

    #[test]
    fn generate_image_request_accepts_status_poll() {
        let parsed: GenerateImageRequest =
            serde_json::from_str(r#"{"action":"status","jobId":"abc"}"#).unwrap();
        assert_eq!(parsed.action, GenerateImageAction::Status);
        assert_eq!(parsed.job_id.as_deref(), Some("abc"));
    }
}
