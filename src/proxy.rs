// Upstream relay with single-retry recovery from token rejection

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::{header, Client, Response, StatusCode};

use crate::auth::TokenManager;
use crate::error::GatewayError;

/// Position in the bounded two-call relay loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// Forwards opaque request bodies to the upstream API, authenticated with
/// the current bearer token
pub struct UpstreamProxy {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Token cache manager
    tokens: Arc<TokenManager>,

    /// Upstream API base URL, no trailing slash
    base_url: String,

    /// Fixed client identifier header value
    client_id: String,
}

impl UpstreamProxy {
    pub fn new(
        tokens: Arc<TokenManager>,
        base_url: String,
        client_id: String,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
        })
    }

    /// Relay an opaque body to the named upstream endpoint.
    ///
    /// Issues at most two upstream calls: a 401 on the first attempt drops
    /// the cached token and retries exactly once with a freshly acquired
    /// one. The final attempt's response is returned as-is whatever its
    /// status; non-401 error statuses are the relayed upstream outcome, not
    /// a local failure.
    pub async fn forward(&self, endpoint: &str, body: Bytes) -> Result<Response, GatewayError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut token = self.tokens.get_valid_token().await?;
        let mut attempt = Attempt::First;

        loop {
            let response = self
                .client
                .post(&url)
                .header("Client-ID", &self.client_id)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(header::ACCEPT, "application/json")
                .body(body.clone())
                .send()
                .await
                .map_err(GatewayError::Proxy)?;

            if attempt == Attempt::First && response.status() == StatusCode::UNAUTHORIZED {
                tracing::warn!(
                    endpoint,
                    "Upstream rejected the access token, retrying once with a fresh one"
                );
                self.tokens.invalidate();
                token = self.tokens.get_valid_token().await?;
                attempt = Attempt::Retry;
                continue;
            }

            tracing::debug!(
                endpoint,
                status = response.status().as_u16(),
                attempt = ?attempt,
                "Upstream response"
            );
            return Ok(response);
        }
    }
}
