//! OAuth 2.0 authorization code flow with PKCE (RFC 7636)
//!
//! - [`AuthorizationFlow`]: login redirect, callback, session status, logout
//! - [`TokenRefresher`]: refresh-token grant written back to the session
//! - [`ProviderClient`]: `/token` and `/revoke` calls
//! - [`IdTokenDecoder`]: ID token payload to `userInfo`, optionally JWKS-verified

mod flow;
mod id_token;
pub mod pkce;
mod provider;
mod refresh;

pub use flow::{AuthorizationFlow, CallbackOutcome, CallbackParams, LoginRedirect, SessionStatus};
pub use id_token::{IdTokenDecoder, decode_unverified};
pub use provider::{DEFAULT_EXPIRES_IN, ProviderClient, TokenResponse};
pub use refresh::TokenRefresher;
