// Error handling module
// Defines error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that can occur while relaying a request
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The OAuth issuer rejected or failed the acquisition call
    #[error("token acquisition failed: {status} - {body}")]
    UpstreamAuth { status: u16, body: String },

    /// Network-level failure reaching the upstream API
    #[error("upstream request failed: {0}")]
    Proxy(#[source] reqwest::Error),

    /// Caller's shared secret missing or mismatched
    #[error("invalid or missing API key")]
    Unauthorized,

    /// Request validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            GatewayError::UpstreamAuth { status, body } => {
                // Issuer details are logged but never shown to callers
                tracing::error!(status, body = %body, "Token acquisition failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "relay_failure",
                    "Failed to acquire upstream credentials".to_string(),
                )
            }
            GatewayError::Proxy(err) => {
                tracing::error!("Upstream request failed: {err}");
                (
                    StatusCode::BAD_GATEWAY,
                    "bad_gateway",
                    "Failed to reach upstream API".to_string(),
                )
            }
            GatewayError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key".to_string(),
            ),
            GatewayError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            GatewayError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = GatewayError::UpstreamAuth {
            status: 403,
            body: "invalid client secret".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "token acquisition failed: 403 - invalid client secret"
        );

        let err = GatewayError::Unauthorized;
        assert_eq!(err.to_string(), "invalid or missing API key");

        let err = GatewayError::Validation("endpoint must not be empty".to_string());
        assert_eq!(err.to_string(), "validation error: endpoint must not be empty");
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let response = GatewayError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upstream_auth_is_bad_gateway() {
        let err = GatewayError::UpstreamAuth {
            status: 500,
            body: "issuer exploded".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_upstream_auth_body_is_not_echoed() {
        let err = GatewayError::UpstreamAuth {
            status: 403,
            body: "super-secret issuer detail".to_string(),
        };
        let response = err.into_response();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("super-secret issuer detail"));
        assert!(text.contains("relay_failure"));
    }

    #[tokio::test]
    async fn test_validation_error_response() {
        let err = GatewayError::Validation("bad input".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_internal_error_response() {
        let err = GatewayError::Internal(anyhow::anyhow!("unexpected"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
