use crate::http::build_client;
use crate::money::round_two;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("missing email provider credentials in env")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(String),
}

/// Everything the confirmation emails need, resolved from the paid
/// checkout session and the submitted order.
#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub order_id: i64,
    pub product_title: String,
    pub mockup_url: String,
    pub buyer_name: Option<String>,
    pub buyer_email: Option<String>,
    pub shipping_address: Vec<String>,
    pub subtotal: f64,
    pub shipping: f64,
    pub tax: f64,
    pub total: f64,
}

#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify_buyer(&self, summary: &OrderSummary) -> Result<(), NotifyError>;
    async fn notify_operator(&self, summary: &OrderSummary) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub from_address: String,
    pub operator_address: Option<String>,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("EMAIL_BASE_URL")
                .unwrap_or_else(|_| "https://api.sendgrid.com".into()),
            api_key: std::env::var("EMAIL_API_KEY").ok(),
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "orders@printmuse.dev".into()),
            operator_address: std::env::var("OPERATOR_EMAIL").ok(),
        }
    }
}

#[derive(Clone)]
pub struct EmailClient {
    http: Client,
    config: EmailConfig,
}

impl EmailClient {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifyError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(NotifyError::MissingCredentials)?;
        let body = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.config.from_address },
            "subject": subject,
            "content": [{ "type": "text/html", "value": html }]
        });
        let started = std::time::Instant::now();
        let response = self
            .http
            .post(format!("{}/v3/mail/send", self.config.base_url))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|err| NotifyError::Request(err.to_string()))?;
        crate::metrics::provider_call("email", started.elapsed().as_millis());

        if !response.status().is_success() {
            return Err(NotifyError::Request(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderNotifier for EmailClient {
    async fn notify_buyer(&self, summary: &OrderSummary) -> Result<(), NotifyError> {
        let Some(email) = summary.buyer_email.as_deref().filter(|e| !e.is_empty()) else {
            warn!(
                target = "printmuse.notify",
                order_id = summary.order_id,
                "no buyer email on session; skipping confirmation"
            );
            return Err(NotifyError::Request("no buyer email on session".into()));
        };
        let subject = format!("Your PrintMuse order #{} is confirmed", summary.order_id);
        self.send(email, &subject, &buyer_html(summary)).await
    }

    async fn notify_operator(&self, summary: &OrderSummary) -> Result<(), NotifyError> {
        let Some(operator) = self
            .config
            .operator_address
            .as_deref()
            .filter(|e| !e.is_empty())
        else {
            return Err(NotifyError::MissingCredentials);
        };
        let subject = format!("New order #{}: {}", summary.order_id, summary.product_title);
        self.send(operator, &subject, &operator_html(summary)).await
    }
}

fn amounts_table(summary: &OrderSummary) -> String {
    format!(
        "<table>\
         <tr><td>Subtotal</td><td>${:.2}</td></tr>\
         <tr><td>Shipping</td><td>${:.2}</td></tr>\
         <tr><td>Tax</td><td>${:.2}</td></tr>\
         <tr><td><strong>Total</strong></td><td><strong>${:.2}</strong></td></tr>\
         </table>",
        round_two(summary.subtotal),
        round_two(summary.shipping),
        round_two(summary.tax),
        round_two(summary.total),
    )
}

fn address_block(summary: &OrderSummary) -> String {
    if summary.shipping_address.is_empty() {
        return String::new();
    }
    format!("<p>Ships to:<br>{}</p>", summary.shipping_address.join("<br>"))
}

pub fn buyer_html(summary: &OrderSummary) -> String {
    let greeting = summary
        .buyer_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(|name| format!("Hi {name},"))
        .unwrap_or_else(|| "Hi,".to_string());
    format!(
        "<h1>Thanks for your order!</h1>\
         <p>{greeting}</p>\
         <p>Your <strong>{}</strong> is on its way to production.</p>\
         <img src=\"{}\" alt=\"Your design\" width=\"320\">\
         {}{}\
         <p>We will email you again once it ships.</p>\
         <p>The PrintMuse team</p>",
        summary.product_title,
        summary.mockup_url,
        amounts_table(summary),
        address_block(summary),
    )
}

pub fn operator_html(summary: &OrderSummary) -> String {
    let buyer = summary.buyer_email.as_deref().unwrap_or("unknown");
    format!(
        "<h1>Order #{} submitted</h1>\
         <p>Product: {}</p>\
         <p>Buyer: {}</p>\
         <img src=\"{}\" alt=\"Mockup\" width=\"320\">\
         {}{}",
        summary.order_id,
        summary.product_title,
        buyer,
        summary.mockup_url,
        amounts_table(summary),
        address_block(summary),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> OrderSummary {
        OrderSummary {
            order_id: 4242,
            product_title: "Canvas 16×16 in".into(),
            mockup_url: "https://cdn.example/mockup.png".into(),
            buyer_name: Some("Sam".into()),
            buyer_email: Some("sam@example.com".into()),
            shipping_address: vec!["5 Main St".into(), "Austin, TX 78701".into(), "US".into()],
            subtotal: 30.95,
            shipping: 6.19,
            tax: 2.06,
            total: 39.2,
        }
    }

    #[test]
    fn buyer_email_includes_amounts_and_mockup() {
        let html = buyer_html(&summary());
        assert!(html.contains("Hi Sam,"));
        assert!(html.contains("$30.95"));
        assert!(html.contains("$39.20"));
        assert!(html.contains("https://cdn.example/mockup.png"));
        assert!(html.contains("Austin, TX 78701"));
    }

    #[test]
    fn buyer_greeting_degrades_without_name() {
        let mut s = summary();
        s.buyer_name = None;
        let html = buyer_html(&s);
        assert!(html.contains("<p>Hi,</p>"));
    }

    #[test]
    fn operator_email_names_the_buyer() {
        let html = operator_html(&summary());
        assert!(html.contains("Order #4242"));
        assert!(html.contains("sam@example.com"));
    }
}
