use crate::catalog::shipping_cost;
use crate::models::CheckoutSessionRequest;
use crate::money::to_cents;
use crate::payments::{CheckoutSession, PaymentsClient, PaymentsError};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid checkout request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Payments(#[from] PaymentsError),
}

pub fn default_origin() -> String {
    std::env::var("PUBLIC_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// Flattens a checkout request into the form-encoded pairs the payments
/// provider expects: one line item for the artwork, one for shipping, and
/// everything fulfillment later needs stashed in session metadata.
pub fn build_session_form(request: &CheckoutSessionRequest, origin: &str) -> Vec<(String, String)> {
    let shipping = shipping_cost(request.selling_price);
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        (
            "success_url".into(),
            format!("{origin}/success?session_id={{CHECKOUT_SESSION_ID}}"),
        ),
        ("cancel_url".into(), origin.to_string()),
        (
            "shipping_address_collection[allowed_countries][0]".into(),
            "US".into(),
        ),
        (
            "shipping_address_collection[allowed_countries][1]".into(),
            "CA".into(),
        ),
        ("automatic_tax[enabled]".into(), "true".into()),
    ];

    form.extend([
        (
            "line_items[0][price_data][currency]".into(),
            "usd".into(),
        ),
        (
            "line_items[0][price_data][product_data][name]".into(),
            request.product_title.clone(),
        ),
        (
            "line_items[0][price_data][product_data][images][0]".into(),
            request.mockup_url.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".into(),
            to_cents(request.selling_price).to_string(),
        ),
        ("line_items[0][quantity]".into(), "1".into()),
        (
            "line_items[1][price_data][currency]".into(),
            "usd".into(),
        ),
        (
            "line_items[1][price_data][product_data][name]".into(),
            "Shipping".into(),
        ),
        (
            "line_items[1][price_data][unit_amount]".into(),
            to_cents(shipping).to_string(),
        ),
        ("line_items[1][quantity]".into(), "1".into()),
    ]);

    form.extend([
        (
            "metadata[productId]".into(),
            request.product_id.to_string(),
        ),
        (
            "metadata[variantId]".into(),
            request.variant_id.to_string(),
        ),
        (
            "metadata[productTitle]".into(),
            request.product_title.clone(),
        ),
        ("metadata[mockupUrl]".into(), request.mockup_url.clone()),
        (
            "metadata[originalImageUrl]".into(),
            request.original_image_url.clone(),
        ),
        ("metadata[shippingCost]".into(), format!("{shipping:.2}")),
    ]);

    form
}

fn validate(request: &CheckoutSessionRequest) -> Result<(), CheckoutError> {
    if request.product_title.trim().is_empty() {
        return Err(CheckoutError::Invalid("productTitle must not be blank".into()));
    }
    if request.selling_price <= 0.0 {
        return Err(CheckoutError::Invalid(
            "sellingPrice must be positive".into(),
        ));
    }
    if request.mockup_url.trim().is_empty() || request.original_image_url.trim().is_empty() {
        return Err(CheckoutError::Invalid(
            "mockupUrl and originalImageUrl are required".into(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CheckoutService {
    payments: PaymentsClient,
}

impl CheckoutService {
    pub fn new(payments: PaymentsClient) -> Self {
        Self { payments }
    }

    pub async fn create_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, CheckoutError> {
        validate(request)?;
        let origin = request
            .origin
            .clone()
            .filter(|origin| !origin.trim().is_empty())
            .unwrap_or_else(default_origin);
        let form = build_session_form(request, origin.trim_end_matches('/'));
        let session = self.payments.create_checkout_session(&form).await?;
        info!(
            target = "printmuse.checkout",
            session_id = %session.id,
            product_id = request.product_id,
            variant_id = request.variant_id,
            "checkout session created"
        );
        Ok(session)
    }
}
