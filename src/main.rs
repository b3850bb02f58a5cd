mod cache;
mod catalog;
mod checkout;
mod fulfillment;
mod generation;
mod http;
mod imagegen;
mod jobs;
mod metrics;
mod mockup;
mod models;
mod money;
mod notify;
mod payments;
mod poller;
mod printful;
mod security;
mod storage;
mod upscale;
mod wizard;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cache::SharedCache;
use catalog::{CatalogError, CatalogResolver, PrintfulCatalogSource};
use checkout::{CheckoutError, CheckoutService};
use fulfillment::{
    CompletionReport, FulfillmentError, FulfillmentSequencer, OrderSubmitter,
    PrintfulOrderSubmitter, SessionSource,
};
use generation::{GenerationError, GenerationOrchestrator};
use jobs::JobStore;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use mockup::{MockupError, MockupOrchestrator, MockupSource, PrintfulMockupSource};
use models::{
    ApiError, CatalogAction, CatalogProxyRequest, CheckoutCompleteRequest, CheckoutSessionRequest,
    GenerateImageAction, GenerateImageRequest, StartGenerationResponse,
};
use notify::EmailClient;
use payments::{CheckoutSession, PaymentsClient};
use printful::orders::OrderRequest;
use security::{RateLimitState, throttle_requests};
use serde::Deserialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use storage::StorageClient;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use upscale::PixelcutClient;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "printmuse.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let rate_state = RateLimitState::from_env();
    let cache = SharedCache::from_env();

    let generation = Arc::new(
        GenerationOrchestrator::new(JobStore::new(cache.clone()), imagegen::provider_from_env())
            .with_storage(StorageClient::from_env()),
    );
    let catalog = Arc::new(CatalogResolver::new(
        Arc::new(PrintfulCatalogSource),
        cache.clone(),
    ));
    let mockup_source: Arc<dyn MockupSource> = Arc::new(PrintfulMockupSource);
    let mockups = Arc::new(MockupOrchestrator::new(Arc::clone(&mockup_source)));

    let payments = PaymentsClient::from_env();
    let checkout = CheckoutService::new(payments.clone());
    let fulfillment = Arc::new(FulfillmentSequencer::new(
        Arc::new(payments) as Arc<dyn SessionSource>,
        Arc::clone(&mockup_source),
        Arc::new(PixelcutClient::from_env()),
        Arc::new(PrintfulOrderSubmitter),
        Arc::new(EmailClient::from_env()),
        cache,
    ));

    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        generation,
        catalog,
        mockups,
        mockup_source,
        orders: Arc::new(PrintfulOrderSubmitter),
        checkout,
        fulfillment,
        openapi: Arc::new(openapi),
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let api = Router::new()
        .route("/api/generate-image", post(generate_image))
        .route("/api/printful", post(printful_proxy))
        .route("/api/checkout/session", post(checkout_session))
        .route("/api/checkout/complete", post(checkout_complete))
        .route_layer(middleware::from_fn_with_state(rate_state, throttle_requests));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "printmuse.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    generation: Arc<GenerationOrchestrator>,
    catalog: Arc<CatalogResolver>,
    mockups: Arc<MockupOrchestrator>,
    mockup_source: Arc<dyn MockupSource>,
    orders: Arc<dyn OrderSubmitter>,
    checkout: CheckoutService,
    fulfillment: Arc<FulfillmentSequencer>,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "printmuse-api-rs",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Validation("unauthorized".into()));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>PrintMuse API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(axum::http::StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Start or poll a prompt-to-image generation job.
///
/// - Method: `POST`
/// - Path: `/api/generate-image`
/// - Body: `GenerateImageRequest` (`action` is `start` or `status`)
/// - Response: job id on start, full job record on status
async fn generate_image(
    State(state): State<AppState>,
    Json(payload): Json<GenerateImageRequest>,
) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/api/generate-image");
    match payload.action {
        GenerateImageAction::Start => {
            let prompt = payload
                .prompt
                .as_deref()
                .map(str::trim)
                .filter(|prompt| !prompt.is_empty())
                .ok_or_else(|| AppError::Validation("prompt is required".into()))?;
            let record = state.generation.start(prompt).await?;
            Ok(Json(StartGenerationResponse { job_id: record.id }).into_response())
        }
        GenerateImageAction::Status => {
            let job_id = payload
                .job_id
                .as_deref()
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| AppError::Validation("jobId is required".into()))?;
            let record = state.generation.status(job_id).await?;
            Ok(Json(record).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductDetailsData {
    product_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateMockupData {
    product_id: i64,
    variant_id: i64,
    image_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MockupResultData {
    task_key: String,
}

fn proxy_data<T: serde::de::DeserializeOwned>(data: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(data).map_err(|err| AppError::Validation(err.to_string()))
}

/// Action-dispatched proxy for the print provider.
///
/// - Method: `POST`
/// - Path: `/api/printful`
/// - Body: `{"action": ..., "data": ...}`
async fn printful_proxy(
    State(state): State<AppState>,
    Json(payload): Json<CatalogProxyRequest>,
) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/api/printful");
    match payload.action {
        CatalogAction::GetCatalogItems => {
            let products = state.catalog.products().await?;
            Ok(Json(products).into_response())
        }
        CatalogAction::GetProductDetails => {
            let data: ProductDetailsData = proxy_data(payload.data)?;
            let listing = state.catalog.product_listing(data.product_id).await?;
            Ok(Json(listing).into_response())
        }
        CatalogAction::GenerateMockup => {
            let data: GenerateMockupData = proxy_data(payload.data)?;
            let job = state
                .mockups
                .begin(Some(data.product_id), Some(data.variant_id), &data.image_url)
                .await?;
            Ok(Json(job).into_response())
        }
        CatalogAction::GetMockupResult => {
            let data: MockupResultData = proxy_data(payload.data)?;
            let status = state
                .mockup_source
                .task_status(&data.task_key)
                .await
                .map_err(AppError::Provider)?;
            Ok(Json(status).into_response())
        }
        CatalogAction::CreateOrder => {
            let request: OrderRequest = proxy_data(payload.data)?;
            let submitted = state
                .orders
                .submit_order(&request)
                .await
                .map_err(AppError::Provider)?;
            Ok(Json(submitted).into_response())
        }
    }
}

/// Create a hosted checkout session for the selected variant and mockup.
///
/// - Method: `POST`
/// - Path: `/api/checkout/session`
/// - Body: `CheckoutSessionRequest`
/// - Response: `CheckoutSession` with the redirect URL
async fn checkout_session(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutSessionRequest>,
) -> Result<Json<CheckoutSession>, AppError> {
    crate::metrics::inc_requests("/api/checkout/session");
    let session = state.checkout.create_session(&payload).await?;
    Ok(Json(session))
}

/// Finish fulfillment for a paid session. Safe to call repeatedly; replays
/// return the original report without placing a second order.
///
/// - Method: `POST`
/// - Path: `/api/checkout/complete`
/// - Body: `CheckoutCompleteRequest`
/// - Response: `CompletionReport`
async fn checkout_complete(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutCompleteRequest>,
) -> Result<Json<CompletionReport>, AppError> {
    crate::metrics::inc_requests("/api/checkout/complete");
    let report = state.fulfillment.complete(&payload.session_id).await?;
    Ok(Json(report))
}

#[derive(Debug)]
enum AppError {
    Validation(String),
    NotFound(String),
    Provider(String),
}

impl From<GenerationError> for AppError {
    fn from(value: GenerationError) -> Self {
        match value {
            GenerationError::EmptyPrompt => Self::Validation(value.to_string()),
            GenerationError::UnknownJob(_) => Self::NotFound(value.to_string()),
            GenerationError::Failed(_) | GenerationError::TimedOut(_) => {
                Self::Provider(value.to_string())
            }
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::UnknownProduct(_) => Self::NotFound(value.to_string()),
            CatalogError::Unavailable(_) => Self::Provider(value.to_string()),
        }
    }
}

impl From<MockupError> for AppError {
    fn from(value: MockupError) -> Self {
        match value {
            MockupError::MissingSelection | MockupError::NoPlacement(_) => {
                Self::Validation(value.to_string())
            }
            MockupError::Provider(_) | MockupError::Failed(_) | MockupError::TimedOut(_) => {
                Self::Provider(value.to_string())
            }
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(value: CheckoutError) -> Self {
        match value {
            CheckoutError::Invalid(_) => Self::Validation(value.to_string()),
            CheckoutError::Payments(_) => Self::Provider(value.to_string()),
        }
    }
}

impl From<FulfillmentError> for AppError {
    fn from(value: FulfillmentError) -> Self {
        match value.stage {
            "resolve" | "recipient" => Self::Validation(value.to_string()),
            _ => Self::Provider(value.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            AppError::Validation(details) => {
                (StatusCode::BAD_REQUEST, "invalid_request", details)
            }
            AppError::NotFound(details) => (StatusCode::NOT_FOUND, "not_found", details),
            AppError::Provider(details) => (StatusCode::BAD_GATEWAY, "provider_error", details),
        };
        let payload = ApiError {
            error: error.to_string(),
            details: Some(details),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
