use crate::cache::SharedCache;
use crate::mockup::{MockupSource, placement_for_variant};
use crate::money::from_cents;
use crate::notify::{OrderNotifier, OrderSummary};
use crate::payments::{PaymentsClient, PaymentsError, SessionDetails};
use crate::printful::orders::{
    self, OrderFile, OrderItem, OrderRecipient, OrderRequest, SubmittedOrder,
};
use crate::upscale::{self, UpscaleProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

const IDEMPOTENCY_TTL_SECS: u64 = 86_400;

#[derive(Debug, Error)]
#[error("{stage}: {message}")]
pub struct FulfillmentError {
    pub stage: &'static str,
    pub message: String,
}

impl FulfillmentError {
    fn new(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: f64,
    pub shipping: f64,
    pub tax: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub buyer_sent: bool,
    pub operator_sent: bool,
}

/// What one paid session turned into. Cached per session so replayed
/// completion calls return the original outcome instead of re-ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub order_id: i64,
    pub totals: OrderTotals,
    pub notifications: NotificationOutcome,
    pub upscaled: bool,
}

#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn resolve_session(&self, session_id: &str) -> Result<SessionDetails, String>;
}

#[async_trait]
impl SessionSource for PaymentsClient {
    async fn resolve_session(&self, session_id: &str) -> Result<SessionDetails, String> {
        self.retrieve_session(session_id)
            .await
            .map_err(|err: PaymentsError| err.to_string())
    }
}

#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    async fn submit_order(&self, request: &OrderRequest) -> Result<SubmittedOrder, String>;
}

pub struct PrintfulOrderSubmitter;

#[async_trait]
impl OrderSubmitter for PrintfulOrderSubmitter {
    async fn submit_order(&self, request: &OrderRequest) -> Result<SubmittedOrder, String> {
        orders::create_order(request)
            .await
            .map_err(|err| err.to_string())
    }
}

/// Post-payment pipeline: resolve the paid session, work out the printfile
/// placement, upscale the art, place the production order, then report
/// totals and send the confirmation emails.
pub struct FulfillmentSequencer {
    sessions: Arc<dyn SessionSource>,
    mockups: Arc<dyn MockupSource>,
    upscaler: Arc<dyn UpscaleProvider>,
    orders: Arc<dyn OrderSubmitter>,
    notifier: Arc<dyn OrderNotifier>,
    cache: SharedCache,
}

impl FulfillmentSequencer {
    pub fn new(
        sessions: Arc<dyn SessionSource>,
        mockups: Arc<dyn MockupSource>,
        upscaler: Arc<dyn UpscaleProvider>,
        orders: Arc<dyn OrderSubmitter>,
        notifier: Arc<dyn OrderNotifier>,
        cache: SharedCache,
    ) -> Self {
        Self {
            sessions,
            mockups,
            upscaler,
            orders,
            notifier,
            cache,
        }
    }

    pub async fn complete(&self, session_id: &str) -> Result<CompletionReport, FulfillmentError> {
        let idempotency_key = format!("fulfillment:{session_id}");
        if let Some(report) = self.cache.get::<CompletionReport>(&idempotency_key).await {
            info!(
                target = "printmuse.fulfillment",
                session_id, order_id = report.order_id,
                "returning previously completed fulfillment"
            );
            return Ok(report);
        }

        let session = self
            .sessions
            .resolve_session(session_id)
            .await
            .map_err(|message| FulfillmentError::new("resolve", message))?;
        if session.payment_status.as_deref() != Some("paid") {
            return Err(FulfillmentError::new(
                "resolve",
                format!(
                    "session is not paid (status: {})",
                    session.payment_status.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        let product_id = metadata_i64(&session, "productId")?;
        let variant_id = metadata_i64(&session, "variantId")?;
        let image_url = metadata_str(&session, "originalImageUrl")?;

        let descriptor = self
            .mockups
            .printfiles(product_id)
            .await
            .map_err(|message| FulfillmentError::new("printfiles", message))?;
        let (placement, _position) = placement_for_variant(&descriptor, variant_id)
            .map_err(|err| FulfillmentError::new("printfiles", err.to_string()))?;

        let (print_url, upscaled) = upscale::best_effort(self.upscaler.as_ref(), &image_url).await;

        let recipient = recipient_from_session(&session)?;
        let request = OrderRequest {
            recipient,
            items: vec![OrderItem {
                variant_id,
                quantity: 1,
                files: vec![OrderFile {
                    url: print_url,
                    file_type: "default".into(),
                    placement,
                }],
            }],
        };
        let order = match self.orders.submit_order(&request).await {
            Ok(order) => order,
            Err(message) => {
                error!(
                    target = "printmuse.fulfillment",
                    session_id, error = %message,
                    "production order submission failed for a paid session"
                );
                return Err(FulfillmentError::new("order", message));
            }
        };
        info!(
            target = "printmuse.fulfillment",
            session_id, order_id = order.id, "production order submitted"
        );

        let totals = totals_from_session(&session);
        let summary = summary_for(&session, &order, &totals);

        let buyer_sent = match self.notifier.notify_buyer(&summary).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = "printmuse.fulfillment",
                    session_id, error = %err, "buyer confirmation email failed"
                );
                false
            }
        };
        let operator_sent = match self.notifier.notify_operator(&summary).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = "printmuse.fulfillment",
                    session_id, error = %err, "operator notification email failed"
                );
                false
            }
        };

        let report = CompletionReport {
            order_id: order.id,
            totals,
            notifications: NotificationOutcome {
                buyer_sent,
                operator_sent,
            },
            upscaled,
        };
        self.cache
            .set(&idempotency_key, &report, IDEMPOTENCY_TTL_SECS)
            .await;
        Ok(report)
    }
}

fn metadata_str(session: &SessionDetails, key: &str) -> Result<String, FulfillmentError> {
    session
        .metadata
        .get(key)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| FulfillmentError::new("resolve", format!("session metadata missing {key}")))
}

fn metadata_i64(session: &SessionDetails, key: &str) -> Result<i64, FulfillmentError> {
    metadata_str(session, key)?.parse::<i64>().map_err(|_| {
        FulfillmentError::new("resolve", format!("session metadata {key} is not a number"))
    })
}

/// Amounts shown to the buyer come straight off the session the provider
/// settled, never recomputed from the catalog.
fn totals_from_session(session: &SessionDetails) -> OrderTotals {
    let shipping = session
        .metadata
        .get("shippingCost")
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(0.0);
    OrderTotals {
        subtotal: from_cents(session.amount_subtotal.unwrap_or(0)),
        shipping,
        tax: from_cents(
            session
                .total_details
                .as_ref()
                .map(|details| details.amount_tax)
                .unwrap_or(0),
        ),
        total: from_cents(session.amount_total.unwrap_or(0)),
    }
}

fn recipient_from_session(session: &SessionDetails) -> Result<OrderRecipient, FulfillmentError> {
    let shipping = session
        .shipping_details
        .as_ref()
        .ok_or_else(|| FulfillmentError::new("recipient", "session has no shipping details"))?;
    let address = shipping
        .address
        .as_ref()
        .ok_or_else(|| FulfillmentError::new("recipient", "session has no shipping address"))?;

    let name = shipping
        .name
        .clone()
        .or_else(|| {
            session
                .customer_details
                .as_ref()
                .and_then(|details| details.name.clone())
        })
        .ok_or_else(|| FulfillmentError::new("recipient", "shipping name missing"))?;

    let required = |field: &Option<String>, label: &'static str| {
        field
            .clone()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| FulfillmentError::new("recipient", format!("shipping {label} missing")))
    };

    Ok(OrderRecipient {
        name,
        address1: required(&address.line1, "address line")?,
        address2: address.line2.clone(),
        city: required(&address.city, "city")?,
        state_code: address.state.clone(),
        country_code: required(&address.country, "country")?,
        zip: required(&address.postal_code, "postal code")?,
        email: session
            .customer_details
            .as_ref()
            .and_then(|details| details.email.clone()),
    })
}

fn summary_for(
    session: &SessionDetails,
    order: &SubmittedOrder,
    totals: &OrderTotals,
) -> OrderSummary {
    let mut address_lines = Vec::new();
    if let Some(shipping) = &session.shipping_details
        && let Some(address) = &shipping.address
    {
        if let Some(line1) = &address.line1 {
            address_lines.push(line1.clone());
        }
        if let Some(line2) = &address.line2 {
            address_lines.push(line2.clone());
        }
        let locality: Vec<&str> = [&address.city, &address.state, &address.postal_code]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        if !locality.is_empty() {
            address_lines.push(locality.join(", "));
        }
        if let Some(country) = &address.country {
            address_lines.push(country.clone());
        }
    }

    OrderSummary {
        order_id: order.id,
        product_title: session
            .metadata
            .get("productTitle")
            .cloned()
            .unwrap_or_else(|| "Custom print".to_string()),
        mockup_url: session.metadata.get("mockupUrl").cloned().unwrap_or_default(),
        buyer_name: session
            .customer_details
            .as_ref()
            .and_then(|details| details.name.clone()),
        buyer_email: session
            .customer_details
            .as_ref()
            .and_then(|details| details.email.clone()),
        shipping_address: address_lines,
        subtotal: totals.subtotal,
        shipping: totals.shipping,
        tax: totals.tax,
        total: totals.total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use crate::printful::mockups::{MockupTask, MockupTaskRequest, MockupTaskStatus, PrintfileDescriptor};
    use crate::upscale::{ImageProbe, UpscaleError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn paid_session() -> SessionDetails {
        serde_json::from_str(
            r#"{
                "id": "cs_test_1",
                "payment_status": "paid",
                "amount_subtotal": 3095,
                "amount_total": 3920,
                "total_details": {"amount_tax": 206},
                "customer_details": {"name": "Sam", "email": "sam@example.com"},
                "shipping_details": {
                    "name": "Sam",
                    "address": {
                        "line1": "5 Main St",
                        "city": "Austin",
                        "state": "TX",
                        "postal_code": "78701",
                        "country": "US"
                    }
                },
                "metadata": {
                    "productId": "71",
                    "variantId": "9001",
                    "productTitle": "Canvas 16×16",
                    "mockupUrl": "https://cdn.example/mockup.jpg",
                    "originalImageUrl": "https://cdn.example/art.png",
                    "shippingCost": "6.19"
                }
            }"#,
        )
        .unwrap()
    }

    struct FixedSession(SessionDetails);

    #[async_trait]
    impl SessionSource for FixedSession {
        async fn resolve_session(&self, _session_id: &str) -> Result<SessionDetails, String> {
            Ok(self.0.clone())
        }
    }

    struct FixedPrintfiles;

    #[async_trait]
    impl MockupSource for FixedPrintfiles {
        async fn printfiles(&self, _product_id: i64) -> Result<PrintfileDescriptor, String> {
            Ok(serde_json::from_str(
                r#"{
                    "variant_printfiles": [
                        {"variant_id": 9001, "placements": {"front": 101}}
                    ],
                    "printfiles": [
                        {"printfile_id": 101, "width": 1800, "height": 2400}
                    ]
                }"#,
            )
            .unwrap())
        }

        async fn create_task(
            &self,
            _product_id: i64,
            _request: &MockupTaskRequest,
        ) -> Result<MockupTask, String> {
            Err("not used".into())
        }

        async fn task_status(&self, _task_key: &str) -> Result<MockupTaskStatus, String> {
            Err("not used".into())
        }
    }

    struct NoOpUpscaler;

    #[async_trait]
    impl UpscaleProvider for NoOpUpscaler {
        async fn upscale(&self, _image_url: &str, _scale: u32) -> Result<String, UpscaleError> {
            Err(UpscaleError::Request("offline".into()))
        }

        async fn probe(&self, _image_url: &str) -> Result<ImageProbe, UpscaleError> {
            Ok(ImageProbe {
                width: 4096,
                height: 4096,
            })
        }

        async fn file_size(&self, _image_url: &str) -> Result<Option<u64>, UpscaleError> {
            Ok(None)
        }
    }

    struct RecordingSubmitter {
        calls: AtomicU32,
        last: Mutex<Option<OrderRequest>>,
    }

    impl RecordingSubmitter {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl OrderSubmitter for RecordingSubmitter {
        async fn submit_order(&self, request: &OrderRequest) -> Result<SubmittedOrder, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(SubmittedOrder {
                id: 5150,
                status: Some("draft".into()),
            })
        }
    }

    struct FlakyNotifier {
        buyer_ok: bool,
    }

    #[async_trait]
    impl OrderNotifier for FlakyNotifier {
        async fn notify_buyer(&self, _summary: &OrderSummary) -> Result<(), NotifyError> {
            if self.buyer_ok {
                Ok(())
            } else {
                Err(NotifyError::Request("smtp down".into()))
            }
        }

        async fn notify_operator(&self, _summary: &OrderSummary) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn sequencer(
        session: SessionDetails,
        submitter: Arc<RecordingSubmitter>,
        buyer_ok: bool,
    ) -> FulfillmentSequencer {
        FulfillmentSequencer::new(
            Arc::new(FixedSession(session)),
            Arc::new(FixedPrintfiles),
            Arc::new(NoOpUpscaler),
            submitter,
            Arc::new(FlakyNotifier { buyer_ok }),
            SharedCache::in_memory(),
        )
    }

    #[tokio::test]
    async fn paid_session_produces_order_and_totals() {
        let submitter = Arc::new(RecordingSubmitter::new());
        let sequencer = sequencer(paid_session(), submitter.clone(), true);

        let report = sequencer.complete("cs_test_1").await.unwrap();
        assert_eq!(report.order_id, 5150);
        assert_eq!(report.totals.subtotal, 30.95);
        assert_eq!(report.totals.shipping, 6.19);
        assert_eq!(report.totals.tax, 2.06);
        assert_eq!(report.totals.total, 39.2);
        assert!(report.notifications.buyer_sent);
        assert!(report.notifications.operator_sent);
        assert!(!report.upscaled);

        let request = submitter.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.items[0].variant_id, 9001);
        assert_eq!(request.items[0].files[0].placement, "front");
        assert_eq!(request.items[0].files[0].url, "https://cdn.example/art.png");
        assert_eq!(request.recipient.zip, "78701");
    }

    #[tokio::test]
    async fn replayed_completion_does_not_reorder() {
        let submitter = Arc::new(RecordingSubmitter::new());
        let sequencer = sequencer(paid_session(), submitter.clone(), true);

        sequencer.complete("cs_test_1").await.unwrap();
        let replay = sequencer.complete("cs_test_1").await.unwrap();
        assert_eq!(replay.order_id, 5150);
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unpaid_session_is_rejected() {
        let mut session = paid_session();
        session.payment_status = Some("unpaid".into());
        let submitter = Arc::new(RecordingSubmitter::new());
        let sequencer = sequencer(session, submitter.clone(), true);

        let err = sequencer.complete("cs_test_1").await.unwrap_err();
        assert_eq!(err.stage, "resolve");
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_address_fails_before_ordering() {
        let mut session = paid_session();
        session.shipping_details = None;
        let submitter = Arc::new(RecordingSubmitter::new());
        let sequencer = sequencer(session, submitter.clone(), true);

        let err = sequencer.complete("cs_test_1").await.unwrap_err();
        assert_eq!(err.stage, "recipient");
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_buyer_email_does_not_fail_fulfillment() {
        let submitter = Arc::new(RecordingSubmitter::new());
        let sequencer = sequencer(paid_session(), submitter, false);

        let report = sequencer.complete("cs_test_1").await.unwrap();
        assert!(!report.notifications.buyer_sent);
        assert!(report.notifications.operator_sent);
    }
}
