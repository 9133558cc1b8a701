// Token acquisition against the OAuth issuer

use anyhow::Context;
use reqwest::Client;

use super::types::TokenResponse;
use crate::error::GatewayError;

/// Mint a new bearer token via the client-credentials grant.
///
/// A non-success status from the issuer is fatal for this acquisition
/// attempt and carries the issuer's status code and body.
pub async fn request_token(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenResponse, GatewayError> {
    tracing::debug!("Requesting new access token from issuer");

    let form = [
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("grant_type", "client_credentials"),
    ];

    let response = client
        .post(token_url)
        .form(&form)
        .send()
        .await
        .context("Failed to reach token issuer")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::UpstreamAuth {
            status: status.as_u16(),
            body,
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .context("Failed to parse issuer token response")?;

    if token.access_token.is_empty() {
        return Err(GatewayError::Internal(anyhow::anyhow!(
            "Issuer response does not contain an access token"
        )));
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Client {
        Client::new()
    }

    #[tokio::test]
    async fn test_successful_acquisition() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth2/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("client_id".into(), "id-1".into()),
                mockito::Matcher::UrlEncoded("client_secret".into(), "secret-1".into()),
                mockito::Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"T1","expires_in":3600,"token_type":"bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/oauth2/token", server.url());
        let token = request_token(&test_client(), &url, "id-1", "secret-1")
            .await
            .unwrap();

        assert_eq!(token.access_token, "T1");
        assert_eq!(token.expires_in, 3600);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_issuer_rejection_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(403)
            .with_body("invalid client secret")
            .create_async()
            .await;

        let url = format!("{}/oauth2/token", server.url());
        let err = request_token(&test_client(), &url, "id-1", "bad-secret")
            .await
            .unwrap_err();

        match err {
            GatewayError::UpstreamAuth { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "invalid client secret");
            }
            other => panic!("Expected UpstreamAuth, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_issuer_body_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let url = format!("{}/oauth2/token", server.url());
        let err = request_token(&test_client(), &url, "id-1", "secret-1")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Internal(_)));
    }

    #[tokio::test]
    async fn test_empty_access_token_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"","expires_in":3600}"#)
            .create_async()
            .await;

        let url = format!("{}/oauth2/token", server.url());
        let err = request_token(&test_client(), &url, "id-1", "secret-1")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Internal(_)));
    }
}
