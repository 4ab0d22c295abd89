//! Refresh-token grant against the provider, applied to a stored session.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::ProviderClient;
use crate::session::{SessionLocks, SessionStore, now_secs, short_id};
use crate::{Error, Result};

/// Exchanges a session's refresh token for new credentials
#[derive(Clone)]
pub struct TokenRefresher {
    provider: ProviderClient,
    store: Arc<dyn SessionStore>,
    locks: Arc<SessionLocks>,
    refresh_grace: Duration,
}

impl TokenRefresher {
    /// Create a refresher writing back into `store`
    #[must_use]
    pub fn new(
        provider: ProviderClient,
        store: Arc<dyn SessionStore>,
        locks: Arc<SessionLocks>,
        refresh_grace: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            locks,
            refresh_grace,
        }
    }

    /// Refresh the tokens of `session_id` and return the access token to use.
    ///
    /// `stale_access_token` is the token the caller found unusable. The
    /// session is re-read under its lock; if a concurrent request already
    /// replaced that token with a live one, the newer token is returned
    /// without calling the provider.
    ///
    /// The old refresh token is kept when the provider does not rotate it.
    pub async fn refresh(&self, session_id: &str, stale_access_token: &str) -> Result<String> {
        let _guard = self.locks.lock(session_id).await;

        let mut session = self
            .store
            .get(session_id)
            .await
            .ok_or_else(|| Error::Refresh("session no longer exists".to_string()))?;

        if let (Some(current), Some(tokens)) = (session.access_token(), session.tokens())
            && current != stale_access_token
            && !tokens.is_expired_at(now_secs())
        {
            debug!(session = %short_id(session_id), "Access token already refreshed");
            return Ok(current.to_string());
        }

        let refresh_token = session
            .refresh_token()
            .ok_or_else(|| Error::Refresh("session has no refresh token".to_string()))?
            .to_string();

        let response = self.provider.refresh(&refresh_token).await.inspect_err(|e| {
            warn!(session = %short_id(session_id), error = %e, "Token refresh failed");
        })?;

        let mut tokens = response.token_set();
        if tokens.access_token.is_empty() {
            return Err(Error::Refresh("provider returned an empty access token".to_string()));
        }
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token);
        }

        let access_token = tokens.access_token.clone();
        if !session.replace_tokens(tokens, self.refresh_grace) {
            return Err(Error::Refresh("session is not authenticated".to_string()));
        }
        self.store.put(session).await;

        info!(session = %short_id(session_id), "Refreshed access token");
        Ok(access_token)
    }
}
