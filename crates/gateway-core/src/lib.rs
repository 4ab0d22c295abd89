//! Routing primitives for the BFF gateway.
//!
//! A [`RouteTable`] maps inbound request paths to configured backend
//! services. Resolution strips the matched prefix and validates what is left
//! before it is appended to the backend base URL, so a browser can never
//! reach outside the path space the operator mapped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configured backend service reachable under a path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRoute {
    /// Path prefix on the gateway (e.g. `/api`)
    pub prefix: String,
    /// Backend base URL (e.g. `http://127.0.0.1:9000`)
    pub url: String,
}

impl ServiceRoute {
    /// Create a route
    pub fn new(prefix: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            url: url.into(),
        }
    }
}

/// Route resolution errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No configured prefix matches the path
    #[error("no service configured for path: {0}")]
    NotFound(String),

    /// The remainder path escapes the backend's routing space
    #[error("invalid path remainder: {0}")]
    InvalidPath(String),
}

/// Result of resolving a request path against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    /// The matched route
    pub route: &'a ServiceRoute,
    /// Path left after stripping the prefix, still percent-encoded
    pub remainder: &'a str,
}

impl RouteMatch<'_> {
    /// Build the backend URL: `<base><remainder><?query>`.
    #[must_use]
    pub fn target_url(&self, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.route.url, self.remainder, q),
            _ => format!("{}{}", self.route.url, self.remainder),
        }
    }
}

/// Ordered set of service routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<ServiceRoute>,
}

impl RouteTable {
    /// Build a table, normalizing trailing slashes on prefixes and URLs.
    ///
    /// Order is preserved; it only matters when two prefixes normalize to
    /// the same string, in which case the first wins.
    #[must_use]
    pub fn new(routes: impl IntoIterator<Item = ServiceRoute>) -> Self {
        let routes = routes
            .into_iter()
            .map(|r| ServiceRoute {
                prefix: r.prefix.trim_end_matches('/').to_string(),
                url: r.url.trim_end_matches('/').to_string(),
            })
            .collect();
        Self { routes }
    }

    /// All routes, in configuration order
    #[must_use]
    pub fn routes(&self) -> &[ServiceRoute] {
        &self.routes
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table has no routes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Select the route with the longest prefix matching `path`.
    #[must_use]
    pub fn select(&self, path: &str) -> Option<&ServiceRoute> {
        let mut best: Option<&ServiceRoute> = None;
        for route in &self.routes {
            if !prefix_matches(&route.prefix, path) {
                continue;
            }
            if best.is_none_or(|b| route.prefix.len() > b.prefix.len()) {
                best = Some(route);
            }
        }
        best
    }

    /// Select a route for `path` and validate the remainder.
    pub fn resolve<'a>(&'a self, path: &'a str) -> Result<RouteMatch<'a>, RouteError> {
        let route = self
            .select(path)
            .ok_or_else(|| RouteError::NotFound(path.to_string()))?;
        let remainder = &path[route.prefix.len()..];
        validate_remainder(remainder)?;
        Ok(RouteMatch { route, remainder })
    }
}

/// Prefixes match on whole path segments: `/api` matches `/api` and
/// `/api/users`, never `/apiary`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Reject remainders that contain `..` anywhere or a doubled separator.
///
/// `..` is refused as a substring, not only as a whole segment, so names
/// like `report..v2.pdf` are rejected too.
/// The check runs on the percent-decoded form so `%2e%2e` and `%2F%2F` are
/// caught as well. Remainders that do not decode to UTF-8 are rejected.
pub fn validate_remainder(remainder: &str) -> Result<(), RouteError> {
    let decoded = urlencoding::decode(remainder)
        .map_err(|_| RouteError::InvalidPath(remainder.to_string()))?;

    if decoded.contains("..") || decoded.contains("//") {
        return Err(RouteError::InvalidPath(remainder.to_string()));
    }
    Ok(())
}
