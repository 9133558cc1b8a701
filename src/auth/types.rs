// Token lifecycle types

use serde::{Deserialize, Serialize};

/// Issuer reply to a client-credentials acquisition call
///
/// Never persisted as-is; converted into the cached token record.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Relative lifetime in seconds
    pub expires_in: u64,
    /// Reported by the issuer but not used
    #[serde(default)]
    #[allow(dead_code)]
    pub token_type: Option<String>,
}

/// Snapshot of the cached token state for debug introspection
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub cached: bool,
    /// Whether the cached token would be reused under the expiry buffer
    pub usable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
}
