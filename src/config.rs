//! Configuration management
//!
//! [`Config`] is the raw, deserialized shape (YAML file merged with
//! `BFF_GATEWAY_*` environment variables). [`GatewayConfig`] is the resolved,
//! validated and immutable view every component receives at construction.

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use gateway_core::{RouteTable, ServiceRoute};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default OAuth scope
pub const DEFAULT_SCOPE: &str = "openid profile";

/// Default post-login landing page
pub const DEFAULT_SUCCESS_URI: &str = "/";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files loaded before `BFF_GATEWAY_*` variables are read.
    /// Paths support ~ expansion. Variables already set are not overridden.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Identity provider / client registration
    pub oauth: OAuthConfig,
    /// Session lifetimes and cookie flags
    pub session: SessionConfig,
    /// Backend services, matched by path prefix
    pub services: Vec<ServiceRoute>,
}

impl Config {
    /// Load configuration from an optional YAML file and the environment.
    ///
    /// Files listed under `env_files` are loaded into the process environment
    /// before `BFF_GATEWAY_*` variables are read, so they can carry overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        let env_files: Vec<String> = figment.extract_inner("env_files").unwrap_or_default();
        load_env_files(&env_files);

        // BFF_GATEWAY_OAUTH__CLIENT_ID -> oauth.client_id
        figment = figment.merge(Env::prefixed("BFF_GATEWAY_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Resolve into the immutable gateway configuration.
    pub fn resolve(&self) -> Result<GatewayConfig> {
        GatewayConfig::resolve(&self.oauth, &self.services)
    }
}

/// Load environment files into the process environment.
/// Paths support ~ expansion; files that don't exist are skipped.
fn load_env_files(paths: &[String]) {
    for path_str in paths {
        let expanded = match (path_str.strip_prefix('~'), dirs::home_dir()) {
            (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
            _ => path_str.clone(),
        };

        let path = Path::new(&expanded);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!(path = %expanded, "Loaded env file"),
                Err(e) => tracing::warn!(path = %expanded, error = %e, "Failed to load env file"),
            }
        } else {
            tracing::debug!(path = %expanded, "Env file not found (skipped)");
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout (whole request, including backend round-trips)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum proxied request body size (bytes)
    pub max_body_size: usize,
    /// Path prefix for the login/callback/logout/check-session endpoints
    pub auth_path: String,
    /// Browser origins allowed to call the gateway with credentials.
    /// Empty disables CORS handling.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            auth_path: String::new(),
            cors_origins: Vec::new(),
        }
    }
}

/// Identity provider configuration as written by the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Public client identifier (required)
    pub client_id: Option<String>,
    /// Authorization server base URL (required)
    pub auth_server: Option<String>,
    /// Requested scope (default `openid profile`)
    pub scope: Option<String>,
    /// Redirect URI registered with the provider (default `<auth_server>/success`)
    pub redirect_uri: Option<String>,
    /// Where the browser lands after login/logout (default `/`)
    pub success_uri: Option<String>,
    /// Revoke the session's token at the provider on logout (best effort)
    pub revoke_on_logout: bool,
    /// ID token handling
    pub id_token: IdTokenConfig,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            auth_server: None,
            scope: None,
            redirect_uri: None,
            success_uri: None,
            revoke_on_logout: true,
            id_token: IdTokenConfig::default(),
        }
    }
}

/// ID token handling
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdTokenConfig {
    /// Verify the ID token signature against the provider JWKS
    pub verify: bool,
    /// JWKS location (default `<auth_server>/.well-known/jwks.json`)
    pub jwks_uri: Option<String>,
}

/// Session lifetimes and cookie flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a pending (login started, callback not yet seen) session
    #[serde(with = "humantime_serde")]
    pub pending_ttl: Duration,
    /// How long an authenticated session outlives its access token,
    /// giving the refresh token a chance to be used
    #[serde(with = "humantime_serde")]
    pub refresh_grace: Duration,
    /// Interval of the background expired-session sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Emit the `Secure` cookie attribute (disable only for local HTTP)
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(600),
            refresh_grace: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            secure_cookie: true,
        }
    }
}

/// Resolved, validated gateway configuration.
///
/// Built once at startup and shared read-only behind an `Arc`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Public client identifier
    pub client_id: String,
    /// Authorization server base URL, without trailing slash
    pub auth_server: String,
    /// Requested scope
    pub scope: String,
    /// Redirect URI sent on authorize and token requests
    pub redirect_uri: String,
    /// Post-login/logout landing page
    pub success_uri: String,
    /// Backend services
    pub services: RouteTable,
    /// Revoke tokens on logout
    pub revoke_on_logout: bool,
    /// Verify ID token signatures
    pub verify_id_token: bool,
    /// JWKS location used when verification is enabled
    pub jwks_uri: String,
}

impl GatewayConfig {
    /// Apply defaults and validate.
    ///
    /// Missing `client_id` or `auth_server`, unparsable URLs and service
    /// prefixes not starting with `/` are configuration errors.
    pub fn resolve(oauth: &OAuthConfig, services: &[ServiceRoute]) -> Result<Self> {
        let client_id = non_empty(oauth.client_id.as_deref())
            .ok_or_else(|| Error::Config("oauth.client_id is required".to_string()))?
            .to_string();

        let auth_server = non_empty(oauth.auth_server.as_deref())
            .ok_or_else(|| Error::Config("oauth.auth_server is required".to_string()))?
            .trim_end_matches('/')
            .to_string();
        parse_http_url("oauth.auth_server", &auth_server)?;

        let scope = non_empty(oauth.scope.as_deref())
            .unwrap_or(DEFAULT_SCOPE)
            .to_string();

        let redirect_uri = match non_empty(oauth.redirect_uri.as_deref()) {
            Some(uri) => {
                parse_http_url("oauth.redirect_uri", uri)?;
                uri.to_string()
            }
            None => format!("{auth_server}/success"),
        };

        let success_uri = non_empty(oauth.success_uri.as_deref())
            .unwrap_or(DEFAULT_SUCCESS_URI)
            .to_string();

        for service in services {
            if !service.prefix.starts_with('/') {
                return Err(Error::Config(format!(
                    "service prefix must start with '/': {}",
                    service.prefix
                )));
            }
            parse_http_url(&format!("services[{}].url", service.prefix), &service.url)?;
        }

        let jwks_uri = match non_empty(oauth.id_token.jwks_uri.as_deref()) {
            Some(uri) => {
                parse_http_url("oauth.id_token.jwks_uri", uri)?;
                uri.to_string()
            }
            None => format!("{auth_server}/.well-known/jwks.json"),
        };

        Ok(Self {
            client_id,
            auth_server,
            scope,
            redirect_uri,
            success_uri,
            services: RouteTable::new(services.iter().cloned()),
            revoke_on_logout: oauth.revoke_on_logout,
            verify_id_token: oauth.id_token.verify,
            jwks_uri,
        })
    }

    /// `<auth_server>/authorize`
    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.auth_server)
    }

    /// `<auth_server>/token`
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.auth_server)
    }

    /// `<auth_server>/revoke`
    #[must_use]
    pub fn revoke_endpoint(&self) -> String {
        format!("{}/revoke", self.auth_server)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_http_url(field: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value).map_err(|e| Error::Config(format!("{field}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!(
            "{field}: unsupported scheme '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn oauth(client_id: &str, auth_server: &str) -> OAuthConfig {
        OAuthConfig {
            client_id: Some(client_id.to_string()),
            auth_server: Some(auth_server.to_string()),
            ..OAuthConfig::default()
        }
    }

    #[test]
    fn resolve_applies_defaults() {
        let cfg = GatewayConfig::resolve(&oauth("c1", "https://idp.example/"), &[]).unwrap();

        assert_eq!(cfg.client_id, "c1");
        assert_eq!(cfg.auth_server, "https://idp.example");
        assert_eq!(cfg.scope, "openid profile");
        assert_eq!(cfg.redirect_uri, "https://idp.example/success");
        assert_eq!(cfg.success_uri, "/");
        assert_eq!(cfg.jwks_uri, "https://idp.example/.well-known/jwks.json");
        assert!(cfg.revoke_on_logout);
        assert!(!cfg.verify_id_token);
        assert_eq!(cfg.token_endpoint(), "https://idp.example/token");
        assert_eq!(cfg.authorize_endpoint(), "https://idp.example/authorize");
    }

    #[test]
    fn resolve_keeps_explicit_values() {
        let mut o = oauth("c1", "https://idp.example");
        o.scope = Some("openid email".to_string());
        o.redirect_uri = Some("https://app.example/auth/callback".to_string());
        o.success_uri = Some("/dashboard".to_string());

        let cfg = GatewayConfig::resolve(&o, &[]).unwrap();
        assert_eq!(cfg.scope, "openid email");
        assert_eq!(cfg.redirect_uri, "https://app.example/auth/callback");
        assert_eq!(cfg.success_uri, "/dashboard");
    }

    #[test]
    fn resolve_requires_client_id() {
        let mut o = oauth("", "https://idp.example");
        assert!(matches!(GatewayConfig::resolve(&o, &[]), Err(Error::Config(_))));
        o.client_id = None;
        assert!(matches!(GatewayConfig::resolve(&o, &[]), Err(Error::Config(_))));
    }

    #[test]
    fn resolve_requires_auth_server() {
        let mut o = oauth("c1", "https://idp.example");
        o.auth_server = None;
        let err = GatewayConfig::resolve(&o, &[]).unwrap_err();
        assert!(err.to_string().contains("auth_server"));
    }

    #[test]
    fn resolve_rejects_bad_urls() {
        assert!(GatewayConfig::resolve(&oauth("c1", "not a url"), &[]).is_err());
        assert!(GatewayConfig::resolve(&oauth("c1", "ftp://idp.example"), &[]).is_err());

        let services = vec![ServiceRoute::new("/api", "::nope::")];
        assert!(GatewayConfig::resolve(&oauth("c1", "https://idp.example"), &services).is_err());
    }

    #[test]
    fn resolve_rejects_relative_prefix() {
        let services = vec![ServiceRoute::new("api", "http://127.0.0.1:9000")];
        let err = GatewayConfig::resolve(&oauth("c1", "https://idp.example"), &services)
            .unwrap_err();
        assert!(err.to_string().contains("prefix"));
    }

    #[test]
    fn resolve_preserves_service_order() {
        let services = vec![
            ServiceRoute::new("/b", "http://b.internal"),
            ServiceRoute::new("/a", "http://a.internal/"),
        ];
        let cfg = GatewayConfig::resolve(&oauth("c1", "https://idp.example"), &services).unwrap();
        let prefixes: Vec<_> = cfg.services.routes().iter().map(|r| r.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["/b", "/a"]);
        assert_eq!(cfg.services.routes()[1].url, "http://a.internal");
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.pending_ttl, Duration::from_secs(600));
        assert!(config.session.secure_cookie);
        assert!(config.services.is_empty());
    }
}
