//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, warn};

use super::proxy::ReverseProxyGate;
use crate::Result;
use crate::config::ServerConfig;
use crate::oauth::{AuthorizationFlow, CallbackOutcome, CallbackParams};
use crate::session::SessionStore;
use crate::session::cookie::{clear_session_cookie, session_cookie, session_id_from_headers};

/// Shared application state
pub struct AppState {
    /// Login/callback/logout/check-session
    pub flow: Arc<AuthorizationFlow>,
    /// Catch-all backend proxy
    pub proxy: Arc<ReverseProxyGate>,
    /// Session store (for health reporting)
    pub sessions: Arc<dyn SessionStore>,
    /// Emit `Secure` on session cookies
    pub secure_cookie: bool,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let auth = normalize_auth_path(&server.auth_path);

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route(&format!("{auth}/login"), get(login_handler))
        .route(&format!("{auth}/callback"), get(callback_handler))
        .route(
            &format!("{auth}/logout"),
            get(logout_handler).post(logout_handler),
        )
        .route(&format!("{auth}/check-session"), get(check_session_handler))
        .fallback(proxy_handler)
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            server.request_timeout,
        ));

    if let Some(cors) = cors_layer(&server.cors_origins) {
        router = router.layer(cors);
    }

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// `""`, `"/"` -> `""`; `"auth/"` -> `"/auth"`
fn normalize_auth_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION]),
    )
}

/// 302 Found with a `Location` header
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.count().await,
    }))
}

/// Start the PKCE flow (GET {auth}/login)
///
/// Browsers get a redirect; `Accept: application/json` callers get the URL.
async fn login_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let login = match state.flow.login().await {
        Ok(login) => login,
        Err(e) => {
            error!(error = %e, "Login initiation failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Login initiation failed" })),
            )
                .into_response();
        }
    };

    let jar = CookieJar::new().add(session_cookie(&login.session_id, state.secure_cookie));
    if wants_json(&headers) {
        (jar, Json(json!({ "authUrl": login.authorize_url }))).into_response()
    } else {
        (jar, found(&login.authorize_url)).into_response()
    }
}

/// Provider redirect target (GET {auth}/callback)
async fn callback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response> {
    let session_id = session_id_from_headers(&headers);

    match state.flow.callback(session_id.as_deref(), &params).await? {
        CallbackOutcome::ProviderError { location } => Ok(found(&location)),
        CallbackOutcome::Authenticated {
            session_id,
            location,
        } => {
            let jar = CookieJar::new().add(session_cookie(&session_id, state.secure_cookie));
            Ok((jar, found(&location)).into_response())
        }
    }
}

/// End the session (GET/POST {auth}/logout)
async fn logout_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session_id = session_id_from_headers(&headers);
    state.flow.logout(session_id.as_deref()).await;

    let jar = CookieJar::new().add(clear_session_cookie(state.secure_cookie));
    (jar, found(state.flow.success_uri())).into_response()
}

/// Session status for the SPA (GET {auth}/check-session)
async fn check_session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let session_id = session_id_from_headers(&headers);
    let status = state.flow.check_session(session_id.as_deref()).await;
    ([(header::CACHE_CONTROL, "no-store")], Json(status))
}

/// Everything else goes to a backend
async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<axum::http::Response<Body>> {
    state.proxy.handle(request).await
}
