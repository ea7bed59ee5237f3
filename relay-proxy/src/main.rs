//! Relay Proxy Binary
//!
//! ## Usage
//!
//! ```bash
//! RELAY_IDENTITY_ISSUER_BASE_URL=https://login.example.com \
//! RELAY_IDENTITY_CLIENT_ID=... \
//! RELAY_IDENTITY_CLIENT_SECRET=... \
//! RELAY_BACKEND_BASE_URL=api.example.com \
//! RELAY_COOKIE_SECRET=$(openssl rand -hex 32) \
//! relay-proxy
//!
//! # Several mounts from a file
//! relay-proxy --mounts-file /etc/relay/mounts.json
//!
//! # Local development with request dumps
//! relay-proxy --environment development --verbose --insecure-cookies
//! ```

use clap::Parser;
use relay_proxy::config::{self, Environment, GatewayConfig, MountSpec};
use relay_proxy::RelayProxy;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "relay-proxy")]
#[command(about = "Authenticated forwarding gateway with transparent token refresh")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8421, env = "RELAY_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "RELAY_BIND")]
    bind: String,

    /// Identity provider issuer base URL
    #[arg(long, env = "RELAY_IDENTITY_ISSUER_BASE_URL")]
    issuer_base_url: String,

    /// Token endpoint, if not `<issuer>/oauth/token`
    #[arg(long, env = "RELAY_IDENTITY_TOKEN_URL")]
    token_url: Option<String>,

    /// OAuth client id used for refresh
    #[arg(long, env = "RELAY_IDENTITY_CLIENT_ID")]
    client_id: String,

    /// OAuth client secret used for refresh
    #[arg(long, env = "RELAY_IDENTITY_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Path prefix of the default mount
    #[arg(long, default_value = "proxy", env = "RELAY_PREFIX")]
    prefix: String,

    /// Backend base URL or bare host of the default mount
    #[arg(long, env = "RELAY_BACKEND_BASE_URL")]
    backend_base_url: Option<String>,

    /// Static service credential sent to the backend
    #[arg(long, env = "RELAY_BACKEND_API_KEY", hide_env_values = true)]
    backend_api_key: Option<String>,

    /// Header carrying the backend API key
    #[arg(long, default_value = "x-api-key", env = "RELAY_BACKEND_API_KEY_HEADER")]
    backend_api_key_header: String,

    /// JSON file declaring additional mounts
    #[arg(long, env = "RELAY_MOUNTS_FILE")]
    mounts_file: Option<String>,

    /// Session cookie name
    #[arg(long, default_value = "appSession", env = "RELAY_COOKIE_NAME")]
    cookie_name: String,

    /// Cookie signing secret (32+ bytes)
    #[arg(long, env = "RELAY_COOKIE_SECRET", hide_env_values = true)]
    cookie_secret: String,

    /// Drop the Secure attribute from session cookies (plain-HTTP development)
    #[arg(long, env = "RELAY_INSECURE_COOKIES")]
    insecure_cookies: bool,

    /// Timeout for each outbound call in milliseconds
    #[arg(long, default_value_t = 30000, env = "RELAY_TIMEOUT_MS")]
    timeout_ms: u64,

    /// Largest inbound request body in bytes
    #[arg(long, default_value_t = config::DEFAULT_MAX_BODY_BYTES, env = "RELAY_MAX_BODY_BYTES")]
    max_body_bytes: usize,

    /// Refresh this many seconds before the token expires
    #[arg(long, default_value_t = 0, env = "RELAY_REFRESH_LEEWAY_SECS")]
    refresh_leeway_secs: i64,

    /// Deployment environment
    #[arg(long, value_enum, default_value_t = Environment::Production, env = "RELAY_ENVIRONMENT")]
    environment: Environment,

    /// Log request/response dumps (development only)
    #[arg(long, env = "RELAY_VERBOSE")]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<GatewayConfig, config::ConfigError> {
        let mut mounts = Vec::new();
        if let Some(backend) = self.backend_base_url {
            let mut mount = MountSpec::new(self.prefix, backend);
            mount.api_key = self.backend_api_key;
            mount.api_key_header = self.backend_api_key_header;
            mounts.push(mount);
        }
        if let Some(path) = &self.mounts_file {
            mounts.extend(config::load_mounts(path)?);
        }

        let mut builder = GatewayConfig::builder()
            .port(self.port)
            .bind(self.bind)
            .identity(self.issuer_base_url, self.client_id, self.client_secret)
            .mounts(mounts)
            .cookie_name(self.cookie_name)
            .cookie_secret(self.cookie_secret)
            .secure_cookies(!self.insecure_cookies)
            .timeout_ms(self.timeout_ms)
            .max_body_bytes(self.max_body_bytes)
            .refresh_leeway_secs(self.refresh_leeway_secs)
            .environment(self.environment)
            .verbose(self.verbose);

        if let Some(token_url) = self.token_url {
            builder = builder.token_url(token_url);
        }

        builder.build()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| relay_proxy::DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Cli::parse().into_config()?;

    tracing::info!("Starting Relay Proxy v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Environment: {:?}{}",
        config.environment,
        if config.verbose { " (verbose)" } else { "" }
    );

    let proxy = RelayProxy::new(config)?;
    proxy.run().await?;

    Ok(())
}
