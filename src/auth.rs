//! Access token acquisition
//!
//! OAuth2 client-credentials flow against the identity provider. Tokens are
//! acquired on demand for every use; nothing is cached.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::AuthConfig;
use crate::error::{CalbotError, Result};

/// Scope for the calendar backend
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Scope for the agents orchestrator
pub const AGENTS_SCOPE: &str = "https://ai.azure.com/.default";

/// Source of bearer tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Acquire an access token for the given scope
    async fn access_token(&self, scope: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Client-credentials token source
pub struct ClientCredentials {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    /// Create a token source for the configured tenant
    pub fn new(auth: &AuthConfig) -> Result<Self> {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            auth.authority_host.trim_end_matches('/'),
            auth.tenant_id
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CalbotError::Authentication(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token_url,
            client_id: auth.client_id.clone(),
            client_secret: auth.client_secret.clone(),
        })
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn access_token(&self, scope: &str) -> Result<String> {
        log::info!("Acquiring access token for {}", scope);

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| CalbotError::Authentication(format!("Token request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<TokenResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(TokenResponse {
                access_token: Some(token),
                ..
            }) if !token.is_empty() => {
                log::info!("Token acquired successfully");
                Ok(token)
            }
            Some(TokenResponse {
                error,
                error_description,
                ..
            }) => {
                let reason = error_description
                    .or(error)
                    .unwrap_or_else(|| format!("Unknown error (status {})", status.as_u16()));
                log::error!("Failed to acquire token: {}", reason);
                Err(CalbotError::Authentication(reason))
            }
            None => {
                log::error!("Failed to acquire token: status {}", status);
                Err(CalbotError::Authentication(format!(
                    "Unexpected token response (status {})",
                    status.as_u16()
                )))
            }
        }
    }
}

/// Token source that always returns the same token
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self, _scope: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_config(host: &str) -> AuthConfig {
        AuthConfig {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "secret-1".into(),
            authority_host: host.into(),
        }
    }

    #[tokio::test]
    async fn test_acquire_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "tok-abc"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let creds = ClientCredentials::new(&auth_config(&server.uri())).unwrap();
        assert_eq!(creds.access_token(GRAPH_SCOPE).await.unwrap(), "tok-abc");
        // No caching: a second call hits the endpoint again.
        assert_eq!(creds.access_token(GRAPH_SCOPE).await.unwrap(), "tok-abc");
    }

    #[tokio::test]
    async fn test_missing_access_token_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })))
            .mount(&server)
            .await;

        let creds = ClientCredentials::new(&auth_config(&server.uri())).unwrap();
        let err = creds.access_token(GRAPH_SCOPE).await.unwrap_err();
        assert!(matches!(err, CalbotError::Authentication(_)));
        assert!(err.to_string().contains("Invalid client secret"));
    }

    #[tokio::test]
    async fn test_non_json_response_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let creds = ClientCredentials::new(&auth_config(&server.uri())).unwrap();
        let err = creds.access_token(AGENTS_SCOPE).await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_static_token() {
        let source = StaticToken("fixed".into());
        assert_eq!(source.access_token("any").await.unwrap(), "fixed");
    }
}
