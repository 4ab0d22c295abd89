//! Server-side sessions
//!
//! A session is created pending at login (holding the PKCE verifier and the
//! anti-CSRF state) and promoted to authenticated at callback (holding the
//! provider tokens). The two phases are an enum so a record can never carry
//! both.

pub mod cookie;
mod locks;
mod store;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use locks::SessionLocks;
pub use store::{InMemorySessionStore, SessionStore, spawn_sweeper};

/// Current Unix time in seconds
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// First characters of a session id, safe to log
#[must_use]
pub fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(i, _)| &id[..i])
}

/// Credentials issued by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer access token
    pub access_token: String,
    /// Refresh token, if the provider issued one
    pub refresh_token: Option<String>,
    /// Access token expiry (Unix seconds)
    pub expires_at: u64,
}

impl TokenSet {
    /// Whether the access token is past its expiry at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Session lifecycle phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Login started, waiting for the provider callback
    Pending {
        /// PKCE code verifier
        code_verifier: String,
        /// Anti-CSRF state issued with the authorize redirect
        state: String,
    },
    /// Callback completed, tokens held
    Authenticated {
        /// Provider credentials
        tokens: TokenSet,
        /// Claims decoded from the ID token
        user_info: Option<Value>,
    },
}

/// A session record, keyed by its opaque id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session id (cookie value)
    pub id: String,
    /// Lifecycle phase
    pub phase: SessionPhase,
    /// When the store may purge the record (Unix seconds)
    pub evict_at: u64,
}

impl Session {
    /// Create a pending session living for `ttl`.
    #[must_use]
    pub fn pending(id: String, code_verifier: String, state: String, ttl: Duration) -> Self {
        Self {
            id,
            phase: SessionPhase::Pending {
                code_verifier,
                state,
            },
            evict_at: now_secs().saturating_add(ttl.as_secs()),
        }
    }

    /// Promote to authenticated, dropping the verifier and state.
    ///
    /// The record outlives the access token by `grace` so it can still be
    /// refreshed.
    pub fn authenticate(&mut self, tokens: TokenSet, user_info: Option<Value>, grace: Duration) {
        self.evict_at = tokens.expires_at.saturating_add(grace.as_secs());
        self.phase = SessionPhase::Authenticated { tokens, user_info };
    }

    /// Replace the tokens of an authenticated session after a refresh.
    ///
    /// Returns `false` (and changes nothing) if the session is still pending.
    pub fn replace_tokens(&mut self, new_tokens: TokenSet, grace: Duration) -> bool {
        match &mut self.phase {
            SessionPhase::Authenticated { tokens, .. } => {
                self.evict_at = new_tokens.expires_at.saturating_add(grace.as_secs());
                *tokens = new_tokens;
                true
            }
            SessionPhase::Pending { .. } => false,
        }
    }

    /// PKCE verifier, while pending
    #[must_use]
    pub fn code_verifier(&self) -> Option<&str> {
        match &self.phase {
            SessionPhase::Pending { code_verifier, .. } if !code_verifier.is_empty() => {
                Some(code_verifier)
            }
            _ => None,
        }
    }

    /// Anti-CSRF state, while pending
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        match &self.phase {
            SessionPhase::Pending { state, .. } => Some(state),
            SessionPhase::Authenticated { .. } => None,
        }
    }

    /// Provider tokens, once authenticated
    #[must_use]
    pub fn tokens(&self) -> Option<&TokenSet> {
        match &self.phase {
            SessionPhase::Authenticated { tokens, .. } => Some(tokens),
            SessionPhase::Pending { .. } => None,
        }
    }

    /// Non-empty access token, once authenticated
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.tokens()
            .map(|t| t.access_token.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Non-empty refresh token, once authenticated
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens()
            .and_then(|t| t.refresh_token.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// ID token claims, once authenticated
    #[must_use]
    pub fn user_info(&self) -> Option<&Value> {
        match &self.phase {
            SessionPhase::Authenticated { user_info, .. } => user_info.as_ref(),
            SessionPhase::Pending { .. } => None,
        }
    }

    /// Authenticated with an access token that has not expired at `now`
    #[must_use]
    pub fn is_live_at(&self, now: u64) -> bool {
        self.access_token().is_some() && self.tokens().is_some_and(|t| !t.is_expired_at(now))
    }

    /// Whether the store may purge this record at `now`
    #[must_use]
    pub fn is_evictable_at(&self, now: u64) -> bool {
        now >= self.evict_at
    }
}
