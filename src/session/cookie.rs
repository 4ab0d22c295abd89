//! Session cookie helpers.
//!
//! `session_id` is the only cookie the gateway reads or writes.

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session_id";

/// Extract the session id from the request's `Cookie` header(s).
///
/// Returns `None` when the cookie is absent or empty.
#[must_use]
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// `session_id=<id>; HttpOnly; SameSite=Strict; Secure; Path=/`
#[must_use]
pub fn session_cookie(session_id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

/// Cookie that makes the browser drop the session cookie (`Max-Age=0`).
#[must_use]
pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}
