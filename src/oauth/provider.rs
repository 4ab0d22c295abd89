//! Identity provider client
//!
//! Form-encoded calls to the provider's `/token` (authorization code and
//! refresh grants) and `/revoke` endpoints.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::session::{TokenSet, now_secs};
use crate::{Error, Result};

/// Access token lifetime assumed when the provider omits `expires_in`
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

/// OAuth token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer access token
    pub access_token: String,
    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OIDC ID token (JWT)
    #[serde(default)]
    pub id_token: Option<String>,
    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert into a [`TokenSet`] with an absolute expiry.
    #[must_use]
    pub fn token_set(&self) -> TokenSet {
        TokenSet {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone().filter(|t| !t.is_empty()),
            expires_at: now_secs()
                .saturating_add(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN)),
        }
    }
}

/// HTTP client for the identity provider
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    config: Arc<GatewayConfig>,
}

impl ProviderClient {
    /// Create a client with its own connection pool
    pub fn new(config: Arc<GatewayConfig>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build provider HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, config))
    }

    /// Create a client reusing an existing `reqwest::Client`
    #[must_use]
    pub fn with_http_client(http: Client, config: Arc<GatewayConfig>) -> Self {
        Self { http, config }
    }

    /// Exchange an authorization code (plus PKCE verifier) for tokens.
    ///
    /// Any failure becomes [`Error::TokenExchange`]; the provider's error text
    /// is kept in the error for logging only.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];

        self.token_request(&params)
            .await
            .map_err(Error::TokenExchange)
    }

    /// Redeem a refresh token for a new access/refresh pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        self.token_request(&params).await.map_err(Error::Refresh)
    }

    /// Revoke a token at the provider (RFC 7009 style form post).
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let params = [
            ("token", token),
            ("client_id", self.config.client_id.as_str()),
        ];

        let response = self
            .http
            .post(self.config.revoke_endpoint())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "Revocation failed: HTTP {status} - {body}"
            )));
        }
        Ok(())
    }

    /// POST a grant to the token endpoint; errors are flattened to text.
    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, String> {
        let endpoint = self.config.token_endpoint();
        debug!(endpoint = %endpoint, grant_type = params[0].1, "Token request");

        let response = self
            .http
            .post(&endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {status} - {body}"));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("invalid token response: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_set_defaults_expiry() {
        let resp: TokenResponse = serde_json::from_str(r#"{"access_token":"at"}"#).unwrap();
        let set = resp.token_set();
        let now = now_secs();
        assert_eq!(set.access_token, "at");
        assert!(set.refresh_token.is_none());
        assert!(set.expires_at >= now + DEFAULT_EXPIRES_IN - 1);
    }

    #[test]
    fn token_set_uses_expires_in() {
        let resp: TokenResponse = serde_json::from_str(
            r#"{"access_token":"at","refresh_token":"rt","expires_in":120,"token_type":"Bearer"}"#,
        )
        .unwrap();
        let set = resp.token_set();
        assert_eq!(set.refresh_token.as_deref(), Some("rt"));
        assert!(set.expires_at <= now_secs() + 120);
        assert!(set.expires_at >= now_secs() + 119);
    }

    #[test]
    fn huge_expires_in_saturates() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at","expires_in":18446744073709551615}"#)
                .unwrap();
        let set = resp.token_set();
        assert_eq!(set.expires_at, u64::MAX);
        assert!(!set.is_expired_at(now_secs()));
    }

    #[test]
    fn empty_refresh_token_is_dropped() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at","refresh_token":""}"#).unwrap();
        assert!(resp.token_set().refresh_token.is_none());
    }
}
