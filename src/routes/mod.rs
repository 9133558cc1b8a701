use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self as axum_middleware},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{TokenManager, TokenStatus};
use crate::error::GatewayError;
use crate::middleware;
use crate::proxy::UpstreamProxy;

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upstream response headers relayed to the caller; everything else is
/// dropped
const FORWARDED_HEADERS: [&str; 2] = ["x-count", "x-next-page"];

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub shared_secret: Option<String>,
    pub token_manager: Arc<TokenManager>,
    pub proxy: Arc<UpstreamProxy>,
}

/// Health check routes (no authentication required)
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// Relay routes (require the shared secret)
pub fn relay_routes(state: AppState) -> Router {
    Router::new()
        .route("/v4/:endpoint", post(relay_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}

/// Token debug routes (require the shared secret)
pub fn token_routes(state: AppState) -> Router {
    Router::new()
        .route("/token/status", get(token_status_handler))
        .route("/token/refresh", get(token_refresh_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}

/// GET / - Simple health check
///
/// This endpoint does not require authentication (for load balancers).
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Relay gateway is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// POST /v4/{endpoint} - Relay an opaque query payload upstream
///
/// The body is forwarded unmodified. The upstream status and body are
/// returned as-is, with only the pagination headers copied over.
async fn relay_handler(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    if endpoint.is_empty() {
        return Err(GatewayError::Validation(
            "endpoint must not be empty".to_string(),
        ));
    }

    tracing::info!(endpoint = %endpoint, bytes = body.len(), "Relaying request upstream");

    let upstream = state.proxy.forward(&endpoint, body).await?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("Invalid upstream status: {e}")))?;

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");
    for name in FORWARDED_HEADERS {
        if let Some(value) = upstream.headers().get(name) {
            if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
                builder = builder.header(name, value);
            }
        }
    }

    let stream = upstream.bytes_stream().map_err(std::io::Error::other);
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("Failed to build response: {e}")))
}

/// GET /token/status - Debug introspection of the cached token
async fn token_status_handler(
    State(state): State<AppState>,
) -> Result<Json<TokenStatus>, GatewayError> {
    Ok(Json(state.token_manager.status()?))
}

/// GET /token/refresh - Force a new acquisition regardless of cache state
async fn token_refresh_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, GatewayError> {
    let record = state.token_manager.force_refresh().await?;
    let expires_at =
        DateTime::<Utc>::from_timestamp_millis(record.expires_at).map(|t| t.to_rfc3339());

    Ok(Json(json!({
        "refreshed": true,
        "expires_at": expires_at
    })))
}
