//! BFF Gateway Library
//!
//! Backend-for-Frontend gateway for single-page apps. The browser holds only
//! an opaque `session_id` cookie; OAuth 2.0 tokens stay on the server.
//!
//! # Features
//!
//! - **Authorization code + PKCE**: login redirect, callback with state check,
//!   code exchange, optional JWKS verification of the ID token
//! - **Reverse proxy**: path-prefix routing to backend services with
//!   `Authorization: Bearer` injection and a single refresh-and-retry on 401
//! - **Sessions**: pluggable store, per-session locking, lazy and periodic expiry
//! - **Operations**: structured logging, graceful shutdown, health endpoint

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::LogFormat;

/// Setup tracing/logging
///
/// `RUST_LOG` overrides `level` when set.
pub fn setup_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    let initialized = match format {
        LogFormat::Json => subscriber.with(fmt::layer().json()).try_init(),
        LogFormat::Text => subscriber.with(fmt::layer()).try_init(),
    };
    initialized.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
