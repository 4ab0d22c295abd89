//! Authenticated reverse proxy to backend services.
//!
//! Every request not handled by the auth endpoints lands here. The session
//! cookie is swapped for `Authorization: Bearer <access token>`, the path is
//! mapped onto a configured backend, and the backend's response is streamed
//! back. A backend 401 triggers at most one token refresh per request.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, header},
};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::Unauthenticated;
use crate::oauth::TokenRefresher;
use crate::session::{SessionStore, cookie::session_id_from_headers, now_secs, short_id};
use crate::{Error, Result};

/// Methods forwarded to backends
const ALLOWED_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::PUT, Method::DELETE];

/// Connection-scoped headers (RFC 9110 §7.6.1) never forwarded in either direction
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards authenticated requests to backend services
pub struct ReverseProxyGate {
    config: Arc<GatewayConfig>,
    store: Arc<dyn SessionStore>,
    refresher: TokenRefresher,
    http: reqwest::Client,
    max_body_size: usize,
}

impl ReverseProxyGate {
    /// Create the proxy with its own backend connection pool.
    ///
    /// Backend redirects are returned to the browser, not followed.
    pub fn new(
        config: Arc<GatewayConfig>,
        store: Arc<dyn SessionStore>,
        refresher: TokenRefresher,
        max_body_size: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build backend HTTP client: {e}")))?;

        Ok(Self {
            config,
            store,
            refresher,
            http,
            max_body_size,
        })
    }

    /// Proxy one request.
    ///
    /// Rejections happen in order: no session cookie (401), no usable
    /// session (401), method (405), unknown service (404), traversal in the
    /// remainder (400), oversized body (413).
    pub async fn handle(&self, request: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();

        let session_id = session_id_from_headers(&parts.headers)
            .ok_or(Error::Unauthenticated(Unauthenticated::NoSession))?;

        let session = self
            .store
            .get(&session_id)
            .await
            .filter(|s| s.access_token().is_some())
            .ok_or(Error::Unauthenticated(Unauthenticated::NoCredentials))?;

        if !ALLOWED_METHODS.contains(&parts.method) {
            return Err(Error::MethodNotAllowed(parts.method.to_string()));
        }

        let target = self
            .config
            .services
            .resolve(parts.uri.path())?
            .target_url(parts.uri.query());

        let body = self.read_body(&parts.headers, body).await?;
        let headers = forward_headers(&parts.headers);

        let can_refresh = session.refresh_token().is_some();
        let mut access_token = session.access_token().unwrap_or_default().to_string();
        let mut refreshed = false;

        if session
            .tokens()
            .is_some_and(|t| t.is_expired_at(now_secs()))
        {
            if !can_refresh {
                return Err(Error::Unauthenticated(Unauthenticated::NoCredentials));
            }
            debug!(
                session = %short_id(&session_id),
                "Access token expired, refreshing before forward"
            );
            access_token = self.refresh(&session_id, &access_token).await?;
            refreshed = true;
        }

        let mut upstream = self
            .forward(&parts.method, &target, &headers, &body, &access_token)
            .await?;

        if upstream.status() == reqwest::StatusCode::UNAUTHORIZED && can_refresh && !refreshed {
            debug!(
                session = %short_id(&session_id),
                target = %target,
                "Backend returned 401, refreshing"
            );
            access_token = self.refresh(&session_id, &access_token).await?;
            upstream = self
                .forward(&parts.method, &target, &headers, &body, &access_token)
                .await?;
        }

        debug!(
            method = %parts.method,
            target = %target,
            status = upstream.status().as_u16(),
            "Proxied request"
        );
        Ok(into_response(upstream))
    }

    async fn read_body(&self, headers: &HeaderMap, body: Body) -> Result<Bytes> {
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_body_size) {
            return Err(Error::PayloadTooLarge);
        }

        axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|e| {
                debug!(error = %e, "Request body rejected");
                Error::PayloadTooLarge
            })
    }

    async fn refresh(&self, session_id: &str, stale_access_token: &str) -> Result<String> {
        self.refresher
            .refresh(session_id, stale_access_token)
            .await
            .map_err(|e| match e {
                Error::Refresh(_) => e,
                other => Error::Refresh(other.to_string()),
            })
    }

    async fn forward(
        &self,
        method: &Method,
        target: &str,
        headers: &HeaderMap,
        body: &Bytes,
        access_token: &str,
    ) -> Result<reqwest::Response> {
        let bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| Error::Unauthenticated(Unauthenticated::NoCredentials))?;

        let mut headers = headers.clone();
        headers.insert(header::AUTHORIZATION, bearer);

        let mut request = self.http.request(method.clone(), target).headers(headers);
        if !body.is_empty() {
            request = request.body(body.clone());
        }

        request.send().await.map_err(|e| {
            warn!(target = %target, error = %e, "Backend request failed");
            Error::Upstream(e.to_string())
        })
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Inbound headers as sent to the backend: no cookies, host, length or
/// hop-by-hop headers. `Authorization` is set per attempt.
fn forward_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::COOKIE);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::AUTHORIZATION);
    headers
}

/// Backend status and headers with a streamed body
fn into_response(upstream: reqwest::Response) -> Response<Body> {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
