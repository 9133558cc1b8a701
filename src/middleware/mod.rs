// Shared-secret gate and CORS

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::GatewayError;
use crate::routes::AppState;

/// Caller authentication middleware
///
/// Accepts the shared secret in the `x-api-key` header or the `key` query
/// parameter. When no secret is configured the gateway runs in open mode
/// and every caller passes. A rejected caller is turned away before any
/// token or upstream work happens.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    let Some(expected) = state.shared_secret.as_deref() else {
        return Ok(next.run(request).await);
    };

    if let Some(header) = request.headers().get("x-api-key") {
        if let Ok(key) = header.to_str() {
            if key == expected {
                return Ok(next.run(request).await);
            }
        }
    }

    if query_param(request.uri().query(), "key") == Some(expected) {
        return Ok(next.run(request).await);
    }

    let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    tracing::warn!(
        "[{}] Access attempt with invalid or missing API key: {} {}",
        request_id,
        request.method(),
        request.uri().path()
    );
    Err(GatewayError::Unauthorized)
}

/// Extract a raw query parameter value
fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Create the CORS middleware layer
///
/// With no allow-list every origin is accepted. A configured entry with a
/// leading `*` matches any origin ending with the remainder of the entry;
/// other entries must match exactly. Preflight OPTIONS requests are
/// answered by the layer with no body.
pub fn cors_layer(allowed_origins: Option<Vec<String>>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    match allowed_origins {
        None => layer.allow_origin(Any),
        Some(patterns) => layer.allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request_parts: &axum::http::request::Parts| {
                origin
                    .to_str()
                    .map(|origin| origin_allowed(origin, &patterns))
                    .unwrap_or(false)
            },
        )),
    }
}

/// Origin allow-list matching, wildcard entries are suffix matches
fn origin_allowed(origin: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match pattern.strip_prefix('*') {
        Some(suffix) => origin.ends_with(suffix),
        None => origin == pattern,
    })
}
