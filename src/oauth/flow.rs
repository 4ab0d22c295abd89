//! Authorization code + PKCE flow: login, callback, session status, logout.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::{SESSION_ID_BYTES, STATE_BYTES, VERIFIER_BYTES, derive_challenge, generate_code};
use super::{IdTokenDecoder, ProviderClient};
use crate::config::{GatewayConfig, SessionConfig};
use crate::error::MissingParameter;
use crate::session::{Session, SessionLocks, SessionStore, now_secs, short_id};
use crate::{Error, Result};

/// A freshly started login
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Id of the new pending session (cookie value)
    pub session_id: String,
    /// Provider authorize URL the browser must visit
    pub authorize_url: String,
}

/// Query parameters the provider sends to the callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Anti-CSRF state echoed back
    pub state: Option<String>,
    /// Provider error code (e.g. `access_denied`)
    pub error: Option<String>,
    /// Human-readable provider error
    pub error_description: Option<String>,
}

/// Where the callback sends the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The provider reported an error; bounce to the redirect URI with it
    ProviderError {
        /// Redirect target carrying `error=<code>`
        location: String,
    },
    /// Tokens obtained and stored
    Authenticated {
        /// Session now holding the tokens
        session_id: String,
        /// Success landing page
        location: String,
    },
}

/// Body of the check-session endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Whether a live access token is held
    pub authenticated: bool,
    /// ID token claims
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

impl SessionStatus {
    fn anonymous() -> Self {
        Self {
            authenticated: false,
            user_info: None,
        }
    }
}

/// Drives the browser through the provider's authorization endpoint and
/// manages the resulting session.
pub struct AuthorizationFlow {
    config: Arc<GatewayConfig>,
    store: Arc<dyn SessionStore>,
    locks: Arc<SessionLocks>,
    provider: ProviderClient,
    id_tokens: IdTokenDecoder,
    pending_ttl: Duration,
    refresh_grace: Duration,
}

impl AuthorizationFlow {
    /// Create the flow
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        store: Arc<dyn SessionStore>,
        locks: Arc<SessionLocks>,
        provider: ProviderClient,
        id_tokens: IdTokenDecoder,
        session: &SessionConfig,
    ) -> Self {
        Self {
            config,
            store,
            locks,
            provider,
            id_tokens,
            pending_ttl: session.pending_ttl,
            refresh_grace: session.refresh_grace,
        }
    }

    /// Start a login: store a pending session and build the authorize URL.
    pub async fn login(&self) -> Result<LoginRedirect> {
        let code_verifier = generate_code(VERIFIER_BYTES)?;
        let code_challenge = derive_challenge(&code_verifier);
        let state = generate_code(STATE_BYTES)?;
        let session_id = generate_code(SESSION_ID_BYTES)?;

        let mut authorize_url = Url::parse(&self.config.authorize_endpoint())
            .map_err(|e| Error::Internal(format!("invalid authorize endpoint: {e}")))?;
        {
            let mut params = authorize_url.query_pairs_mut();
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &self.config.redirect_uri);
            params.append_pair("scope", &self.config.scope);
            params.append_pair("state", &state);
            params.append_pair("code_challenge", &code_challenge);
            params.append_pair("code_challenge_method", "S256");
            params.append_pair("response_type", "code");
        }

        self.store
            .put(Session::pending(
                session_id.clone(),
                code_verifier,
                state,
                self.pending_ttl,
            ))
            .await;

        debug!(session = %short_id(&session_id), "Login started");
        Ok(LoginRedirect {
            session_id,
            authorize_url: authorize_url.into(),
        })
    }

    /// Complete a login from the provider's redirect.
    ///
    /// Checks run in order: provider error, missing `code`/`state`, unknown
    /// session, state mismatch, missing verifier. Only then is the code
    /// exchanged. The whole sequence holds the session's lock.
    pub async fn callback(
        &self,
        session_id: Option<&str>,
        params: &CallbackParams,
    ) -> Result<CallbackOutcome> {
        if let Some(error) = params.error.as_deref() {
            warn!(
                error = %error,
                description = params.error_description.as_deref().unwrap_or(""),
                "Provider returned an authorization error"
            );
            return Ok(CallbackOutcome::ProviderError {
                location: self.error_redirect(error)?,
            });
        }

        let (Some(code), Some(state)) = (
            params.code.as_deref().filter(|c| !c.is_empty()),
            params.state.as_deref().filter(|s| !s.is_empty()),
        ) else {
            return Err(Error::MissingParameter(MissingParameter::CodeOrState));
        };

        let session_id = session_id.ok_or(Error::SessionNotFound)?;
        let _guard = self.locks.lock(session_id).await;

        let mut session = self
            .store
            .get(session_id)
            .await
            .ok_or(Error::SessionNotFound)?;

        let state_matches = session
            .state()
            .is_some_and(|expected| bool::from(expected.as_bytes().ct_eq(state.as_bytes())));
        if !state_matches {
            warn!(session = %short_id(session_id), "Callback state mismatch");
            return Err(Error::StateMismatch);
        }

        let code_verifier = session
            .code_verifier()
            .ok_or(Error::MissingParameter(MissingParameter::CodeVerifier))?
            .to_string();

        let response = self
            .provider
            .exchange_code(code, &code_verifier)
            .await
            .inspect_err(|e| {
                warn!(session = %short_id(session_id), error = %e, "Code exchange failed");
            })?;

        let user_info = match response.id_token.as_deref().filter(|t| !t.is_empty()) {
            Some(id_token) => Some(self.id_tokens.decode(id_token).await?),
            None => None,
        };

        session.authenticate(response.token_set(), user_info, self.refresh_grace);
        self.store.put(session).await;

        info!(session = %short_id(session_id), "Session authenticated");
        Ok(CallbackOutcome::Authenticated {
            session_id: session_id.to_string(),
            location: self.config.success_uri.clone(),
        })
    }

    /// Report whether the session holds a live access token.
    ///
    /// Never refreshes and never writes the record.
    pub async fn check_session(&self, session_id: Option<&str>) -> SessionStatus {
        let Some(session_id) = session_id else {
            return SessionStatus::anonymous();
        };

        match self.store.get(session_id).await {
            Some(session) if session.is_live_at(now_secs()) => SessionStatus {
                authenticated: true,
                user_info: session.user_info().cloned(),
            },
            _ => SessionStatus::anonymous(),
        }
    }

    /// Delete the session and, if configured, revoke its tokens.
    ///
    /// Revocation runs on a background task and never delays the response.
    /// Failures are logged only.
    pub async fn logout(&self, session_id: Option<&str>) {
        let Some(session_id) = session_id else {
            return;
        };

        let session = {
            let _guard = self.locks.lock(session_id).await;
            let session = self.store.get(session_id).await;
            self.store.delete(session_id).await;
            session
        };

        let Some(session) = session else {
            debug!(session = %short_id(session_id), "Logout for unknown session");
            return;
        };
        info!(session = %short_id(session_id), "Session logged out");

        if !self.config.revoke_on_logout {
            return;
        }
        let Some(token) = session
            .refresh_token()
            .or_else(|| session.access_token())
            .map(str::to_string)
        else {
            return;
        };
        let provider = self.provider.clone();
        let short = short_id(session_id).to_string();
        tokio::spawn(async move {
            if let Err(e) = provider.revoke(&token).await {
                warn!(session = %short, error = %e, "Token revocation failed");
            }
        });
    }

    /// Landing page after login and logout
    #[must_use]
    pub fn success_uri(&self) -> &str {
        &self.config.success_uri
    }

    fn error_redirect(&self, error: &str) -> Result<String> {
        let mut location = Url::parse(&self.config.redirect_uri)
            .map_err(|e| Error::Internal(format!("invalid redirect_uri: {e}")))?;
        location.query_pairs_mut().append_pair("error", error);
        Ok(location.into())
    }
}
