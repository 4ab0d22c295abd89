//! Configuration loading tests
//!
//! YAML files are written to a temp dir and loaded through `Config::load`.

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use bff_gateway::Error;
use bff_gateway::config::Config;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn loads_full_yaml() {
    // GIVEN: a config file setting every section
    let file = write_config(
        r#"
server:
  host: 0.0.0.0
  port: 9443
  request_timeout: 45s
  max_body_size: 2048
  auth_path: /auth
  cors_origins: ["https://app.example"]
oauth:
  client_id: spa-client
  auth_server: https://idp.example/
  scope: openid email
  success_uri: /home
  revoke_on_logout: false
  id_token:
    verify: true
session:
  pending_ttl: 5m
  refresh_grace: 12h
  secure_cookie: false
services:
  - prefix: /api
    url: http://127.0.0.1:9000/
  - prefix: /billing
    url: http://billing.internal
"#,
    );

    // WHEN: it is loaded and resolved
    let config = Config::load(Some(file.path())).unwrap();
    let resolved = config.resolve().unwrap();

    // THEN: raw values and humantime durations come through
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9443);
    assert_eq!(config.server.request_timeout, Duration::from_secs(45));
    assert_eq!(config.server.max_body_size, 2048);
    assert_eq!(config.server.auth_path, "/auth");
    assert_eq!(config.server.cors_origins, vec!["https://app.example"]);
    assert_eq!(config.session.pending_ttl, Duration::from_secs(300));
    assert_eq!(config.session.refresh_grace, Duration::from_secs(12 * 3600));
    assert!(!config.session.secure_cookie);

    // AND: resolution applies normalization and derived defaults
    assert_eq!(resolved.client_id, "spa-client");
    assert_eq!(resolved.auth_server, "https://idp.example");
    assert_eq!(resolved.scope, "openid email");
    assert_eq!(resolved.redirect_uri, "https://idp.example/success");
    assert_eq!(resolved.success_uri, "/home");
    assert!(!resolved.revoke_on_logout);
    assert!(resolved.verify_id_token);
    assert_eq!(resolved.jwks_uri, "https://idp.example/.well-known/jwks.json");
    assert_eq!(resolved.services.len(), 2);
    assert_eq!(resolved.services.routes()[0].url, "http://127.0.0.1:9000");
}

#[test]
fn minimal_yaml_uses_defaults() {
    let file = write_config(
        r"
oauth:
  client_id: c1
  auth_server: http://localhost:8081
",
    );

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.request_timeout, Duration::from_secs(30));
    assert_eq!(config.session.pending_ttl, Duration::from_secs(600));
    assert!(config.session.secure_cookie);
    assert!(config.oauth.revoke_on_logout);

    let resolved = config.resolve().unwrap();
    assert_eq!(resolved.scope, "openid profile");
    assert_eq!(resolved.success_uri, "/");
    assert!(resolved.services.is_empty());
}

#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("absent.yaml"))).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn malformed_duration_is_config_error() {
    let file = write_config(
        r"
session:
  pending_ttl: soon
",
    );
    assert!(matches!(
        Config::load(Some(file.path())),
        Err(Error::Config(_))
    ));
}

#[test]
fn missing_client_id_fails_resolution() {
    let file = write_config(
        r"
oauth:
  auth_server: https://idp.example
",
    );

    let config = Config::load(Some(file.path())).unwrap();
    let err = config.resolve().unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("client_id"));
}

#[test]
fn env_files_feed_environment_overrides() {
    // GIVEN: an env file carrying a BFF_GATEWAY_ override, plus a missing one
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join("gateway.env");
    std::fs::write(&env_path, "BFF_GATEWAY_SESSION__SWEEP_INTERVAL=7s\n").unwrap();

    let file = write_config(&format!(
        "env_files:\n  - {}\n  - {}\n",
        env_path.display(),
        dir.path().join("missing.env").display()
    ));

    // WHEN: loaded
    let config = Config::load(Some(file.path())).unwrap();

    // THEN: the override applies and the missing file is skipped
    assert_eq!(config.env_files.len(), 2);
    assert_eq!(config.session.sweep_interval, Duration::from_secs(7));
}
