//! Relay Proxy - authenticated forwarding gateway
//!
//! Sits between a browser-facing API surface and a backend API. Callers
//! authenticate with a session cookie; the proxy swaps it for a bearer
//! token, refreshing the token first when it has expired.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      ┌──────────────────────────┐      ┌─────────────┐
//! │   Browser   │──────│   Relay Proxy            │──────│  Backend    │
//! │   (cookie)  │ HTTP │                          │ HTTP │  API        │
//! └─────────────┘      │  1. Resolve session      │      └─────────────┘
//!                      │  2. Derive backend route │
//!                      │  3. Refresh if expired ──┼────► Identity provider
//!                      │  4. Forward with bearer  │      (token endpoint)
//!                      │  5. Relay status + body  │
//!                      └──────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```text
//! GET http://relay-proxy:8421/proxy/items?limit=5
//! Cookie: appSession=...
//!
//! ──► GET https://api.example.com/items?limit=5
//!     Authorization: Bearer <access token>
//! ```

pub mod config;
pub mod gateway;
pub mod proxy;
pub mod session;

pub use config::{ConfigError, Environment, GatewayConfig, GatewayConfigBuilder, Mount, MountSpec};
pub use proxy::{ProxyStats, StatsResponse};
pub use session::{CookieSessionStore, MemorySessionStore, SessionStore};

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "relay_proxy=info,relay_core=info,tower_http=debug";

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use relay_core::TokenRefresher;
use tokio::signal;

/// Shared proxy state
///
/// Built once at startup. The HTTP client is the single outbound client for
/// both the token exchange and backend forwarding; it is `Send + Sync` and
/// pools connections internally.
pub struct ProxyState {
    pub config: GatewayConfig,
    pub http: reqwest::Client,
    pub refresher: TokenRefresher,
    pub sessions: Arc<dyn SessionStore>,
    pub stats: ProxyStats,
}

impl ProxyState {
    /// State with the signed-cookie session store from `config`
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let store = CookieSessionStore::new(
            config.session.cookie_secret.as_bytes(),
            config.session.cookie_name.clone(),
            config.session.secure_cookies,
        );
        Self::with_store(config, Arc::new(store))
    }

    /// State with a caller-provided session store
    pub fn with_store(
        config: GatewayConfig,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let refresher = TokenRefresher::new(
            http.clone(),
            config.identity.token_url()?,
            config.identity.client_id.clone(),
            config.identity.client_secret.clone(),
        );

        Ok(Self {
            config,
            http,
            refresher,
            sessions,
            stats: ProxyStats::default(),
        })
    }
}

/// Relay Proxy server
pub struct RelayProxy {
    state: Arc<ProxyState>,
}

impl RelayProxy {
    /// Create a new proxy using the signed-cookie session store
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            state: Arc::new(ProxyState::new(config)?),
        })
    }

    /// Create a new proxy with a custom session store
    pub fn with_store(
        config: GatewayConfig,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            state: Arc::new(ProxyState::with_store(config, sessions)?),
        })
    }

    /// Shared state, mainly for inspecting stats
    pub fn state(&self) -> Arc<ProxyState> {
        Arc::clone(&self.state)
    }

    /// Build the router
    pub fn router(&self) -> Router {
        proxy::create_router(Arc::clone(&self.state))
    }

    /// Get the socket address
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.state.config.bind, self.state.config.port).parse()
    }

    /// Run the proxy until Ctrl+C or SIGTERM
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.router();
        let addr = self.addr()?;
        let config = &self.state.config;

        tracing::info!("Relay Proxy listening on http://{}", addr);
        tracing::info!("Session store: {}", self.state.sessions.name());
        tracing::info!("Token endpoint: {}", self.state.refresher.token_url());
        tracing::info!("Endpoints:");
        tracing::info!("  GET  /health       - Health check");
        tracing::info!("  GET  /stats        - Proxy statistics");
        for mount in &config.mounts {
            tracing::info!(
                "  ANY  /{}/*slug  - Relay to {}{}",
                mount.prefix,
                mount.backend_base_url,
                if mount.api_key.is_some() { " (with API key)" } else { "" }
            );
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Relay Proxy shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
