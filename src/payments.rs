use crate::http::build_client;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentsError {
    #[error("missing payment provider credentials in env")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub base_url: String,
    pub secret_key: Option<String>,
}

impl PaymentsConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("PAYMENTS_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".into()),
            secret_key: std::env::var("PAYMENTS_SECRET_KEY").ok(),
        }
    }
}

#[derive(Clone)]
pub struct PaymentsClient {
    http: Client,
    config: PaymentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A resolved checkout session with the amounts the provider recorded.
/// Totals shown to the buyer come from here, never recomputed locally.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDetails {
    pub id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_subtotal: Option<i64>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub total_details: Option<TotalDetails>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub shipping_details: Option<ShippingDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TotalDetails {
    #[serde(default)]
    pub amount_tax: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShippingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<ShippingAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShippingAddress {
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl PaymentsClient {
    pub fn new(config: PaymentsConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(PaymentsConfig::from_env())
    }

    fn auth_header(&self) -> Result<String, PaymentsError> {
        let key = self
            .config
            .secret_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(PaymentsError::MissingCredentials)?;
        Ok(format!("Basic {}", BASE64.encode(format!("{key}:"))))
    }

    pub async fn create_checkout_session(
        &self,
        form: &[(String, String)],
    ) -> Result<CheckoutSession, PaymentsError> {
        let auth = self.auth_header()?;
        let started = std::time::Instant::now();
        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.config.base_url))
            .header(reqwest::header::AUTHORIZATION, auth)
            .form(form)
            .send()
            .await
            .map_err(|err| PaymentsError::Request(err.to_string()))?;
        crate::metrics::provider_call("payments", started.elapsed().as_millis());

        if !response.status().is_success() {
            return Err(PaymentsError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| PaymentsError::Deserialize(err.to_string()))
    }

    pub async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails, PaymentsError> {
        let auth = self.auth_header()?;
        let url = format!(
            "{}/v1/checkout/sessions/{}?expand[]=customer&expand[]=line_items",
            self.config.base_url,
            urlencoding::encode(session_id)
        );
        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|err| PaymentsError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(PaymentsError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| PaymentsError::Deserialize(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_details_parses_amounts_and_metadata() {
        let raw = r#"{
            "id": "cs_test_123",
            "payment_status": "paid",
            "amount_subtotal": 3095,
            "amount_total": 3801,
            "total_details": {"amount_tax": 206},
            "customer_details": {"name": "Sam", "email": "sam@example.com"},
            "shipping_details": {
                "name": "Sam",
                "address": {"line1": "5 Main St", "city": "Austin", "state": "TX", "postal_code": "78701", "country": "US"}
            },
            "metadata": {"productId": "3", "shippingCost": "5.00"}
        }"#;
        let session: SessionDetails = serde_json::from_str(raw).unwrap();
        assert_eq!(session.amount_subtotal, Some(3095));
        assert_eq!(session.total_details.unwrap().amount_tax, 206);
        assert_eq!(session.metadata["productId"], "3");
    }
}
