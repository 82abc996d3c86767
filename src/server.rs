use crate::app::ConfirmationOutcome;
use crate::domain::{CartItem, CheckoutReceipt, ConfirmationPayload, Order};
use crate::error::StorefrontError;
use crate::observability::metrics;
use crate::services::Services;
use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use hyper::Server;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    /// Header carrying the user id set by the upstream auth gateway.
    pub auth_header: Arc<str>,
}

impl AppState {
    pub fn new(services: Services, auth_header: &str) -> Self {
        Self {
            services,
            auth_header: Arc::from(auth_header.to_ascii_lowercase()),
        }
    }
}

/// The authenticated caller. Requests without the gateway header are 401.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(state.auth_header.as_ref())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| AuthUser(v.to_string()))
            .ok_or(ApiError(StorefrontError::Unauthenticated))
    }
}

/// Maps engine errors onto the few failure classes a client gets to see.
#[derive(Debug)]
pub struct ApiError(pub StorefrontError);

impl From<StorefrontError> for ApiError {
    fn from(e: StorefrontError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        use StorefrontError::*;
        match &self.0 {
            InvalidCart(_) | InvalidRequest(_) | InvalidAmount(_) | MalformedPayload(_)
            | StaleTransition { .. } | IllegalTransition { .. } => {
                (StatusCode::BAD_REQUEST, "Your cart or request was invalid")
            }
            PaymentInitFailed { .. } | ProviderUnavailable(_) | ProviderRejected(_) => {
                (StatusCode::BAD_GATEWAY, "Payment could not be completed")
            }
            AccessDenied { .. } => (StatusCode::FORBIDDEN, "Access denied"),
            NotFound { .. } => (StatusCode::NOT_FOUND, "Not found"),
            Unauthenticated | InvalidSignature(_) => (StatusCode::UNAUTHORIZED, "Unauthenticated"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!(kind = self.0.kind(), "Request failed: {}", self.0);
        } else {
            info!(kind = self.0.kind(), status = status.as_u16(), "Request rejected: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "storefront",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CartItem>,
}

async fn checkout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutReceipt>> {
    // Unreadable carts land in the same bucket as rejected ones
    let Json(req) = body.map_err(|e| ApiError(StorefrontError::InvalidCart(e.body_text())))?;
    let receipt = state.services.checkout.submit_checkout(&user_id, &req.items).await?;
    Ok(Json(receipt))
}

fn parse_order_id(raw: &str) -> Result<Uuid, ApiError> {
    // A malformed id can never name one of the caller's orders
    Uuid::parse_str(raw).map_err(|_| ApiError(StorefrontError::not_found("order", raw)))
}

async fn retry_payment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(order_id): Path<String>,
) -> ApiResult<Json<CheckoutReceipt>> {
    let order_id = parse_order_id(&order_id)?;
    let receipt = state.services.checkout.retry_payment(&user_id, order_id).await?;
    Ok(Json(receipt))
}

async fn cancel_order(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Order>> {
    let order_id = parse_order_id(&order_id)?;
    Ok(Json(state.services.checkout.cancel_order(&user_id, order_id).await?))
}

async fn list_orders(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(state.services.checkout.orders_for_user(&user_id).await?))
}

async fn get_order(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Order>> {
    let order_id = parse_order_id(&order_id)?;
    Ok(Json(state.services.checkout.order_for_user(&user_id, order_id).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LibraryResponse {
    book_ids: Vec<String>,
}

async fn library(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> ApiResult<Json<LibraryResponse>> {
    let entitlements = state.services.downloads.library(&user_id).await?;
    Ok(Json(LibraryResponse {
        book_ids: entitlements.into_iter().map(|e| e.book_id).collect(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadResponse {
    download_url: String,
    expires_in_seconds: i64,
}

async fn download(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(book_id): Path<String>,
) -> ApiResult<Json<DownloadResponse>> {
    let token = state.services.downloads.authorize_download(&user_id, &book_id).await?;
    let expires_in_seconds = token.expires_in_seconds(Utc::now());
    Ok(Json(DownloadResponse {
        download_url: token.token,
        expires_in_seconds,
    }))
}

/// Provider callback. 200 when handled or a harmless no-op, 400 for an
/// unreadable payload, 401 for a bad signature, 500 when the store failed and
/// the provider should redeliver.
async fn payment_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let checkout = state.services.checkout.clone();
    let signature = headers
        .get(checkout.provider().signature_header())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let payload = ConfirmationPayload::new(body.to_vec(), signature);

    // Runs to completion even if the provider hangs up mid-request
    let handled = tokio::spawn(async move { checkout.handle_payment_confirmation(&payload).await }).await;

    match handled {
        Ok(Ok(outcome)) => webhook_ack(outcome),
        Ok(Err(e)) => {
            let status = match &e {
                StorefrontError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
                StorefrontError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status.is_server_error() {
                error!("Payment confirmation failed, provider will redeliver: {}", e);
            }
            (status, Json(serde_json::json!({ "error": e.kind() }))).into_response()
        }
        Err(join) => {
            error!("Payment confirmation task aborted: {}", join);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn webhook_ack(outcome: ConfirmationOutcome) -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "outcome": outcome.as_str() }))).into_response()
}

#[derive(Debug, Deserialize)]
struct SignedLink {
    expires: i64,
    signature: String,
}

/// Serves files for locally signed links.
async fn serve_file(
    State(state): State<AppState>,
    Path(file_ref): Path<String>,
    Query(link): Query<SignedLink>,
) -> ApiResult<Response> {
    let signer = state
        .services
        .local_files
        .as_ref()
        .ok_or_else(|| StorefrontError::not_found("file", &file_ref))?;
    signer.verify(&file_ref, link.expires, &link.signature, Utc::now().timestamp())?;
    let path = signer.resolve_path(&file_ref)?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Signed link points at a missing file");
            return Err(StorefrontError::not_found("file", &file_ref).into());
        }
        Err(e) => return Err(StorefrontError::Io(e).into()),
    };
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/checkout", post(checkout))
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/payment", post(retry_payment))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/library", get(library))
        .route("/books/:id/download", get(download))
        .route("/payments/webhook", post(payment_webhook))
        .route("/files/*path", get(serve_file))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("HTTP server running on http://localhost:{port}");
    info!("Health check: http://localhost:{port}/health");

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
