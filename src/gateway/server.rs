//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::proxy::ReverseProxyGate;
use super::router::{AppState, create_router};
use crate::config::{Config, GatewayConfig};
use crate::oauth::{AuthorizationFlow, IdTokenDecoder, ProviderClient, TokenRefresher};
use crate::session::{InMemorySessionStore, SessionLocks, SessionStore, spawn_sweeper};
use crate::{Error, Result};

/// BFF gateway server
pub struct Gateway {
    /// Raw configuration (server and session settings)
    config: Config,
    /// Resolved provider and service configuration
    resolved: Arc<GatewayConfig>,
    /// Session records
    sessions: Arc<dyn SessionStore>,
    /// Per-session locks
    locks: Arc<SessionLocks>,
    /// Handler state
    state: Arc<AppState>,
}

impl Gateway {
    /// Build the gateway with an in-memory session store.
    ///
    /// Fails if the OAuth or service configuration does not resolve.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_store(config, Arc::new(InMemorySessionStore::new()))
    }

    /// Build the gateway on top of an existing session store
    pub fn with_store(config: Config, sessions: Arc<dyn SessionStore>) -> Result<Self> {
        let resolved = Arc::new(config.resolve()?);
        let locks = Arc::new(SessionLocks::new());

        let provider = ProviderClient::new(Arc::clone(&resolved))?;
        let id_tokens = IdTokenDecoder::from_config(&resolved)?;

        let flow = AuthorizationFlow::new(
            Arc::clone(&resolved),
            Arc::clone(&sessions),
            Arc::clone(&locks),
            provider.clone(),
            id_tokens,
            &config.session,
        );
        let refresher = TokenRefresher::new(
            provider,
            Arc::clone(&sessions),
            Arc::clone(&locks),
            config.session.refresh_grace,
        );
        let proxy = ReverseProxyGate::new(
            Arc::clone(&resolved),
            Arc::clone(&sessions),
            refresher,
            config.server.max_body_size,
        )?;

        let state = Arc::new(AppState {
            flow: Arc::new(flow),
            proxy: Arc::new(proxy),
            sessions: Arc::clone(&sessions),
            secure_cookie: config.session.secure_cookie,
        });

        Ok(Self {
            config,
            resolved,
            sessions,
            locks,
            state,
        })
    }

    /// The HTTP application, with all layers applied
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state), &self.config.server)
    }

    /// Session store shared by all handlers
    #[must_use]
    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    /// Run until Ctrl-C/SIGTERM, then drain connections for at most
    /// `server.shutdown_timeout`.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let sweeper = spawn_sweeper(
            Arc::clone(&self.sessions),
            Arc::clone(&self.locks),
            self.config.session.sweep_interval,
            shutdown_tx.subscribe(),
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;
        self.log_banner(listener.local_addr().unwrap_or(addr));

        let mut drain_rx = shutdown_tx.subscribe();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = drain_rx.recv().await;
                })
                .await
        });

        tokio::select! {
            joined = &mut server => {
                let _ = shutdown_tx.send(());
                let _ = sweeper.await;
                return flatten_server_result(joined);
            }
            () = shutdown_signal() => {}
        }

        let _ = shutdown_tx.send(());
        let drain = tokio::time::timeout(self.config.server.shutdown_timeout, &mut server);
        let result = match drain.await {
            Ok(joined) => flatten_server_result(joined),
            Err(_) => {
                warn!(
                    timeout = ?self.config.server.shutdown_timeout,
                    "Graceful shutdown timed out, dropping open connections"
                );
                server.abort();
                Ok(())
            }
        };

        let _ = sweeper.await;
        info!("Gateway stopped");
        result
    }

    fn log_banner(&self, addr: SocketAddr) {
        let auth = self.config.server.auth_path.trim_end_matches('/');

        info!("============================================================");
        info!("BFF GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(address = %addr, "Listening");
        info!(
            provider = %self.resolved.auth_server,
            client_id = %self.resolved.client_id,
            verify_id_token = self.resolved.verify_id_token,
            "Identity provider"
        );
        info!("AUTH ENDPOINTS:");
        info!("  GET      {auth}/login");
        info!("  GET      {auth}/callback");
        info!("  GET/POST {auth}/logout");
        info!("  GET      {auth}/check-session");
        info!("SERVICES:");
        for route in self.resolved.services.routes() {
            info!("  {} -> {}", route.prefix, route.url);
        }
        if self.resolved.services.is_empty() {
            warn!("No services configured - every proxied request will return 404");
        }
        if !self.config.session.secure_cookie {
            warn!("Session cookie is sent without the Secure attribute");
        }
        info!("============================================================");
    }
}

fn flatten_server_result(
    joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(served) => served.map_err(Error::from),
        Err(e) => Err(Error::Internal(format!("server task failed: {e}"))),
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
