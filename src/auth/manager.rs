use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;

use super::supplier;
use super::types::TokenStatus;
use crate::error::GatewayError;
use crate::store::{TokenRecord, TokenStore, TOKEN_KEY};

/// Read-time safety buffer: a cached token within 5 minutes of expiry is
/// treated as stale so it cannot expire mid-flight of a relayed request
const EXPIRY_BUFFER_MS: i64 = 5 * 60 * 1000;

/// Expire the storage entry this long before the token itself expires
const STORE_EXPIRY_MARGIN_SECS: u64 = 600;

/// Floor on the storage TTL so very short-lived issuer tokens cannot
/// thrash the store
const MIN_STORE_TTL_SECS: u64 = 3600;

/// Token cache manager
/// Produces a currently-valid bearer token while minimizing issuer calls
pub struct TokenManager {
    /// Injected store handle holding the single cached record
    store: Arc<dyn TokenStore>,

    /// HTTP client for acquisition requests
    client: Client,

    /// Issuer token endpoint
    token_url: String,

    /// Issuer client credentials
    client_id: String,
    client_secret: String,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        token_url: String,
        client_id: String,
        client_secret: String,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            store,
            client,
            token_url,
            client_id,
            client_secret,
        })
    }

    /// Get a valid access token, acquiring a new one only when the cached
    /// record is absent or inside the expiry buffer.
    ///
    /// Concurrent callers that both observe a stale record will both
    /// acquire; the store's last write wins. The issuer tolerates duplicate
    /// issuance, so no serialization is attempted.
    pub async fn get_valid_token(&self) -> Result<String, GatewayError> {
        if let Some(record) = self
            .store
            .get(TOKEN_KEY)
            .context("Failed to read token store")?
        {
            if is_usable(&record, Utc::now().timestamp_millis()) {
                tracing::debug!("Using cached access token");
                return Ok(record.access_token);
            }
            tracing::debug!("Cached access token is stale");
        }

        let record = self.acquire_and_store().await?;
        Ok(record.access_token)
    }

    /// Unconditionally acquire a fresh token and persist it
    pub async fn force_refresh(&self) -> Result<TokenRecord, GatewayError> {
        self.acquire_and_store().await
    }

    async fn acquire_and_store(&self) -> Result<TokenRecord, GatewayError> {
        let token = supplier::request_token(
            &self.client,
            &self.token_url,
            &self.client_id,
            &self.client_secret,
        )
        .await?;

        let record = TokenRecord {
            access_token: token.access_token,
            expires_at: Utc::now().timestamp_millis() + token.expires_in as i64 * 1000,
        };
        let ttl = storage_ttl(token.expires_in);

        self.store
            .put(TOKEN_KEY, &record, ttl)
            .context("Failed to persist token record")?;

        tracing::info!(
            expires_in = token.expires_in,
            store_ttl = ttl,
            "Acquired new access token"
        );

        Ok(record)
    }

    /// Drop the cached record after a downstream rejection.
    /// Side-effect only; never fails the caller.
    pub fn invalidate(&self) {
        tracing::debug!("Invalidating cached access token");
        if let Err(e) = self.store.delete(TOKEN_KEY) {
            tracing::warn!("Failed to delete cached token record: {e:#}");
        }
    }

    /// Snapshot of the cached token state for debug introspection
    pub fn status(&self) -> Result<TokenStatus, GatewayError> {
        let now = Utc::now().timestamp_millis();

        match self
            .store
            .get(TOKEN_KEY)
            .context("Failed to read token store")?
        {
            Some(record) => Ok(TokenStatus {
                cached: true,
                usable: is_usable(&record, now),
                expires_at: DateTime::<Utc>::from_timestamp_millis(record.expires_at)
                    .map(|t| t.to_rfc3339()),
                expires_in_seconds: Some((record.expires_at - now) / 1000),
            }),
            None => Ok(TokenStatus {
                cached: false,
                usable: false,
                expires_at: None,
                expires_in_seconds: None,
            }),
        }
    }
}

/// Freshness rule: usable only while the expiry buffer has not been reached
fn is_usable(record: &TokenRecord, now_ms: i64) -> bool {
    record.expires_at - EXPIRY_BUFFER_MS > now_ms
}

/// Storage-level TTL: expire the entry ahead of the token itself, but never
/// schedule storage expiration sooner than an hour out
fn storage_ttl(expires_in: u64) -> u64 {
    expires_in
        .saturating_sub(STORE_EXPIRY_MARGIN_SECS)
        .max(MIN_STORE_TTL_SECS)
}
