use crate::http::build_client;
use crate::printful::config::{PRINTFUL_API_KEY, ROOT};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrintfulCatalogError {
    #[error("missing print provider credentials in env")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogProduct {
    pub id: i64,
    pub title: String,
    pub type_name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub variant_count: u32,
    #[serde(default)]
    pub is_discontinued: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogVariant {
    pub id: i64,
    pub product_id: i64,
    #[serde(default)]
    pub name: String,
    pub size: String,
    #[serde(default)]
    pub color: Option<String>,
    pub price: String,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
    #[serde(default)]
    pub image: Option<String>,
}

fn default_in_stock() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ProductDetail {
    pub product: CatalogProduct,
    pub variants: Vec<CatalogVariant>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

fn require_key() -> Result<&'static str, PrintfulCatalogError> {
    let key = PRINTFUL_API_KEY.as_str();
    if key.is_empty() {
        return Err(PrintfulCatalogError::MissingCredentials);
    }
    Ok(key)
}

pub async fn fetch_catalog() -> Result<Vec<CatalogProduct>, PrintfulCatalogError> {
    let key = require_key()?;
    let client = build_client();
    let url = format!("{}/products", *ROOT);
    let started = std::time::Instant::now();
    let response = client
        .get(url)
        .bearer_auth(key)
        .send()
        .await
        .map_err(|err| PrintfulCatalogError::Request(err.to_string()))?;
    crate::metrics::provider_call("printful", started.elapsed().as_millis());

    if !response.status().is_success() {
        return Err(PrintfulCatalogError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: Envelope<Vec<CatalogProduct>> = response
        .json()
        .await
        .map_err(|err| PrintfulCatalogError::Deserialize(err.to_string()))?;
    Ok(payload.result)
}

pub async fn fetch_product_detail(product_id: i64) -> Result<ProductDetail, PrintfulCatalogError> {
    let key = require_key()?;
    let client = build_client();
    let url = format!("{}/products/{}", *ROOT, product_id);
    let started = std::time::Instant::now();
    let response = client
        .get(url)
        .bearer_auth(key)
        .send()
        .await
        .map_err(|err| PrintfulCatalogError::Request(err.to_string()))?;
    crate::metrics::provider_call("printful", started.elapsed().as_millis());

    if !response.status().is_success() {
        return Err(PrintfulCatalogError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: Envelope<ProductDetail> = response
        .json()
        .await
        .map_err(|err| PrintfulCatalogError::Deserialize(err.to_string()))?;
    Ok(payload.result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_product_parses_provider_shape() {
        let raw = r#"{
            "id": 71,
            "title": "Unisex Staple T-Shirt",
            "type_name": "T-Shirt",
            "image": "https://files.example/71.png",
            "variant_count": 108,
            "is_discontinued": false
        }"#;
        let product: CatalogProduct = serde_json::from_str(raw).unwrap();
        assert_eq!(product.id, 71);
        assert_eq!(product.type_name, "T-Shirt");
        assert!(!product.is_discontinued);
    }

    #[test]
    fn variant_defaults_in_stock_when_absent() {
        let raw = r#"{
            "id": 4012,
            "product_id": 71,
            "size": "M",
            "color": "Black",
            "price": "13.25"
        }"#;
        let variant: CatalogVariant = serde_json::from_str(raw).unwrap();
        assert!(variant.in_stock);
        assert_eq!(variant.price, "13.25");
    }
}
