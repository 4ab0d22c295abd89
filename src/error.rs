//! Error types for the BFF gateway
//!
//! Every variant maps to a fixed HTTP status and a generic public body.
//! Provider and backend error text is kept for logs and never reaches the
//! browser.

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gateway_core::RouteError;
use serde_json::json;
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Which callback parameter was missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingParameter {
    /// `code` or `state` absent from the callback query
    CodeOrState,
    /// The pending session holds no PKCE verifier
    CodeVerifier,
}

/// Why a request was rejected as unauthenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unauthenticated {
    /// No `session_id` cookie on the request
    NoSession,
    /// Session unknown, expired, or without an access token
    NoCredentials,
}

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required request parameter missing
    #[error("Missing parameter: {0:?}")]
    MissingParameter(MissingParameter),

    /// Session id absent from the request or unknown to the store
    #[error("Session not found")]
    SessionNotFound,

    /// Callback `state` does not match the one issued at login
    #[error("State mismatch")]
    StateMismatch,

    /// Proxy request without usable credentials
    #[error("Unauthenticated: {0:?}")]
    Unauthenticated(Unauthenticated),

    /// HTTP method outside the proxy allow-list
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// No configured service for the request path
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// Remainder path rejected by traversal checks
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Request body exceeds the configured limit
    #[error("Payload too large")]
    PayloadTooLarge,

    /// Authorization code exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// Refresh token grant failed
    #[error("Token refresh failed: {0}")]
    Refresh(String),

    /// ID token could not be decoded or verified
    #[error("ID token rejected: {0}")]
    IdToken(String),

    /// Secure random source failed
    #[error("Entropy source failure: {0}")]
    Entropy(String),

    /// Backend service unreachable
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error is surfaced as
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_)
            | Self::SessionNotFound
            | Self::StateMismatch
            | Self::InvalidPath(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) | Self::Refresh(_) => StatusCode::UNAUTHORIZED,
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_)
            | Self::TokenExchange(_)
            | Self::IdToken(_)
            | Self::Entropy(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Http(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Generic text safe to show a browser
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingParameter(MissingParameter::CodeOrState) => {
                "Missing authorization code or state"
            }
            Self::MissingParameter(MissingParameter::CodeVerifier) => "Missing code verifier",
            Self::SessionNotFound => "Invalid session",
            Self::StateMismatch => "State mismatch",
            Self::Unauthenticated(Unauthenticated::NoSession) => "No session",
            Self::Unauthenticated(Unauthenticated::NoCredentials) | Self::Refresh(_) => {
                "Unauthorized"
            }
            Self::MethodNotAllowed(_) => "Method not allowed",
            Self::RouteNotFound(_) => "Service not found",
            Self::InvalidPath(_) => "Invalid path",
            Self::PayloadTooLarge => "Payload too large",
            Self::TokenExchange(_) | Self::IdToken(_) => "Authentication failed",
            Self::Entropy(_) => "Login initiation failed",
            Self::Upstream(_) => "Bad gateway",
            Self::Config(_) | Self::Io(_) | Self::Json(_) | Self::Http(_) | Self::Internal(_) => {
                "Internal server error"
            }
        }
    }
}

impl From<RouteError> for Error {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NotFound(path) => Self::RouteNotFound(path),
            RouteError::InvalidPath(path) => Self::InvalidPath(path),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.public_message();

        if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            tracing::error!(error = %self, "Request failed");
            (status, Json(json!({ "error": message }))).into_response()
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
            (status, message).into_response()
        }
    }
}
