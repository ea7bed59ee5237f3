//! Gateway configuration
//!
//! Built from CLI flags / `RELAY_*` environment variables in `main`, or
//! programmatically through [`GatewayConfig::builder`]. Extra mounts can be
//! declared in a JSON file:
//!
//! ```json
//! {
//!   "mounts": [
//!     { "prefix": "proxy", "backend_base_url": "api.example.com" },
//!     { "prefix": "service", "backend_base_url": "https://api.example.com",
//!       "api_key": "…", "api_key_header": "x-api-key" }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use http::HeaderName;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Paths served by the gateway itself; mounts may not shadow them
const RESERVED_PREFIXES: &[&str] = &["health", "stats"];

/// Minimum length of the cookie signing secret
pub const MIN_COOKIE_SECRET_LEN: usize = 32;

/// Default limit on inbound request bodies
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Errors raised while assembling the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL for {field}: '{value}'")]
    InvalidUrl { field: &'static str, value: String },

    #[error("Invalid mount '{prefix}': {reason}")]
    InvalidMount { prefix: String, reason: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Cookie secret must be at least 32 bytes")]
    WeakCookieSecret,

    #[error("Verbose request logging is not allowed in production")]
    VerboseInProduction,

    #[error("Failed to read mounts file {path}: {source}")]
    MountsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse mounts file: {0}")]
    MountsFormat(#[from] serde_json::Error),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

/// Identity provider used for token refresh
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub issuer_base_url: Url,
    /// Overrides `<issuer>/oauth/token`
    pub token_url: Option<Url>,
    pub client_id: String,
    pub client_secret: String,
}

impl IdentityConfig {
    /// The endpoint the refresher posts to
    pub fn token_url(&self) -> Result<Url, ConfigError> {
        match &self.token_url {
            Some(url) => Ok(url.clone()),
            None => relay_core::token_endpoint(&self.issuer_base_url).map_err(|_| {
                ConfigError::InvalidUrl {
                    field: "identity.issuer_base_url",
                    value: self.issuer_base_url.to_string(),
                }
            }),
        }
    }
}

/// A mount as written in a config file or on the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub prefix: String,
    pub backend_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

impl MountSpec {
    pub fn new(prefix: impl Into<String>, backend_base_url: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            backend_base_url: backend_base_url.into(),
            api_key: None,
            api_key_header: default_api_key_header(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn validate(self) -> Result<Mount, ConfigError> {
        let prefix = self.prefix.trim_matches('/').to_string();
        let invalid = |reason: &str| ConfigError::InvalidMount {
            prefix: self.prefix.clone(),
            reason: reason.to_string(),
        };

        if prefix.is_empty() {
            return Err(invalid("prefix must not be empty"));
        }
        if prefix.split('/').any(|s| s.is_empty() || s.starts_with('*') || s.starts_with(':')) {
            return Err(invalid("prefix must be plain path segments"));
        }
        if RESERVED_PREFIXES.contains(&prefix.as_str()) {
            return Err(invalid("prefix is reserved by the gateway"));
        }

        let backend_base_url = normalize_backend_base(&self.backend_base_url)?;

        let api_key_header = HeaderName::from_bytes(self.api_key_header.as_bytes())
            .map_err(|_| invalid("api_key_header is not a valid header name"))?;
        if api_key_header == http::header::AUTHORIZATION {
            return Err(invalid("api_key_header must not be Authorization"));
        }

        Ok(Mount {
            prefix,
            backend_base_url,
            api_key: self.api_key.filter(|k| !k.is_empty()),
            api_key_header,
        })
    }
}

/// A validated `/<prefix>` → backend binding
#[derive(Debug, Clone)]
pub struct Mount {
    /// Without leading or trailing `/`
    pub prefix: String,
    pub backend_base_url: Url,
    pub api_key: Option<String>,
    pub api_key_header: HeaderName,
}

impl Mount {
    /// Route path of the bare prefix, e.g. `/proxy`
    pub fn route_path(&self) -> String {
        format!("/{}", self.prefix)
    }

    /// The raw wildcard remainder of `path`, or `None` for the bare prefix.
    pub fn capture<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path
            .strip_prefix('/')
            .and_then(|p| p.strip_prefix(self.prefix.as_str()))?;

        if rest.is_empty() || !rest.starts_with('/') {
            None
        } else {
            Some(rest)
        }
    }
}

/// `api.example.com` becomes `https://api.example.com/`
pub fn normalize_backend_base(raw: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidUrl {
        field: "backend.base_url",
        value: raw.to_string(),
    };

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let url = Url::parse(&candidate).map_err(|_| invalid())?;
    if url.host_str().is_none() || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid());
    }
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }

    Ok(url)
}

#[derive(Debug, Deserialize)]
struct MountsFile {
    mounts: Vec<MountSpec>,
}

/// Read mount definitions from a JSON file
pub fn load_mounts(path: impl AsRef<Path>) -> Result<Vec<MountSpec>, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::MountsFile {
        path: path.display().to_string(),
        source,
    })?;
    let file: MountsFile = serde_json::from_str(&content)?;
    tracing::info!("Loaded {} mount(s) from {:?}", file.mounts.len(), path);
    Ok(file.mounts)
}

/// Session cookie settings
#[derive(Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie_secret: String,
    pub secure_cookies: bool,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("cookie_name", &self.cookie_name)
            .field("cookie_secret", &"<redacted>")
            .field("secure_cookies", &self.secure_cookies)
            .finish()
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port to listen on
    pub port: u16,
    /// Address to bind to
    pub bind: String,
    pub identity: IdentityConfig,
    pub mounts: Vec<Mount>,
    pub session: SessionConfig,
    /// Timeout for each outbound call in milliseconds
    pub timeout_ms: u64,
    /// Largest inbound body accepted for forwarding
    pub max_body_bytes: usize,
    /// Refresh this many seconds before the recorded expiry
    pub refresh_leeway_secs: i64,
    pub environment: Environment,
    /// Log request/response dumps (development only)
    pub verbose: bool,
}

impl GatewayConfig {
    /// Create a new configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

/// Builder for GatewayConfig
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    port: Option<u16>,
    bind: Option<String>,
    issuer_base_url: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    mounts: Vec<MountSpec>,
    cookie_name: Option<String>,
    cookie_secret: Option<String>,
    secure_cookies: Option<bool>,
    timeout_ms: Option<u64>,
    max_body_bytes: Option<usize>,
    refresh_leeway_secs: Option<i64>,
    environment: Option<Environment>,
    verbose: Option<bool>,
}

impl GatewayConfigBuilder {
    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the bind address
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    /// Identity provider issuer and refresh credentials
    pub fn identity(
        mut self,
        issuer_base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.issuer_base_url = Some(issuer_base_url.into());
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Override the token endpoint derived from the issuer
    pub fn token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = Some(token_url.into());
        self
    }

    /// Add a mount
    pub fn mount(mut self, mount: MountSpec) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Add several mounts
    pub fn mounts(mut self, mounts: impl IntoIterator<Item = MountSpec>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = Some(name.into());
        self
    }

    pub fn cookie_secret(mut self, secret: impl Into<String>) -> Self {
        self.cookie_secret = Some(secret.into());
        self
    }

    pub fn secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = Some(secure);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = Some(max_body_bytes);
        self
    }

    pub fn refresh_leeway_secs(mut self, secs: i64) -> Self {
        self.refresh_leeway_secs = Some(secs);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<GatewayConfig, ConfigError> {
        let issuer_raw = self
            .issuer_base_url
            .ok_or(ConfigError::Missing("identity.issuer_base_url"))?;
        let issuer_base_url = Url::parse(&issuer_raw).map_err(|_| ConfigError::InvalidUrl {
            field: "identity.issuer_base_url",
            value: issuer_raw.clone(),
        })?;
        let token_url = self
            .token_url
            .map(|raw| {
                Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl {
                    field: "identity.token_url",
                    value: raw.clone(),
                })
            })
            .transpose()?;

        let client_id = self
            .client_id
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("identity.client_id"))?;
        let client_secret = self
            .client_secret
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("identity.client_secret"))?;

        if self.mounts.is_empty() {
            return Err(ConfigError::Missing("backend mount"));
        }
        let mut seen = HashSet::new();
        let mut mounts = Vec::with_capacity(self.mounts.len());
        for spec in self.mounts {
            let mount = spec.validate()?;
            if !seen.insert(mount.prefix.clone()) {
                return Err(ConfigError::InvalidMount {
                    prefix: mount.prefix,
                    reason: "prefix declared twice".to_string(),
                });
            }
            mounts.push(mount);
        }

        let cookie_secret = self
            .cookie_secret
            .ok_or(ConfigError::Missing("session.cookie_secret"))?;
        if cookie_secret.len() < MIN_COOKIE_SECRET_LEN {
            return Err(ConfigError::WeakCookieSecret);
        }

        let environment = self.environment.unwrap_or_default();
        let verbose = self.verbose.unwrap_or(false);
        if verbose && environment == Environment::Production {
            return Err(ConfigError::VerboseInProduction);
        }

        Ok(GatewayConfig {
            port: self.port.unwrap_or(8421),
            bind: self.bind.unwrap_or_else(|| "0.0.0.0".to_string()),
            identity: IdentityConfig {
                issuer_base_url,
                token_url,
                client_id,
                client_secret,
            },
            mounts,
            session: SessionConfig {
                cookie_name: self.cookie_name.unwrap_or_else(|| "appSession".to_string()),
                cookie_secret,
                secure_cookies: self.secure_cookies.unwrap_or(true),
            },
            timeout_ms: self.timeout_ms.unwrap_or(30000),
            max_body_bytes: self.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            refresh_leeway_secs: self.refresh_leeway_secs.unwrap_or(0).max(0),
            environment,
            verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn base_builder() -> GatewayConfigBuilder {
        GatewayConfig::builder()
            .identity("https://login.example.com", "client", "secret")
            .cookie_secret(SECRET)
    }

    #[test]
    fn test_defaults() {
        let config = base_builder()
            .mount(MountSpec::new("proxy", "api.example.com"))
            .build()
            .unwrap();

        assert_eq!(config.port, 8421);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.timeout_ms, 30000);
        assert_eq!(config.max_body_bytes, 2 * 1024 * 1024);
        assert_eq!(config.refresh_leeway_secs, 0);
        assert_eq!(config.session.cookie_name, "appSession");
        assert!(config.session.secure_cookies);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(
            config.identity.token_url().unwrap().as_str(),
            "https://login.example.com/oauth/token"
        );

        let mount = &config.mounts[0];
        assert_eq!(mount.prefix, "proxy");
        assert_eq!(mount.backend_base_url.as_str(), "https://api.example.com/");
        assert_eq!(mount.api_key_header.as_str(), "x-api-key");
        assert!(mount.api_key.is_none());
    }

    #[test]
    fn test_token_url_override() {
        let config = base_builder()
            .token_url("https://login.example.com/custom/token")
            .mount(MountSpec::new("proxy", "api.example.com"))
            .build()
            .unwrap();

        assert_eq!(
            config.identity.token_url().unwrap().as_str(),
            "https://login.example.com/custom/token"
        );
    }

    #[test]
    fn test_missing_mount_rejected() {
        let err = base_builder().build().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("backend mount")));
    }

    #[test]
    fn test_duplicate_and_reserved_prefixes_rejected() {
        let err = base_builder()
            .mount(MountSpec::new("/proxy/", "api.example.com"))
            .mount(MountSpec::new("proxy", "api.other.com"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMount { .. }));

        let err = base_builder()
            .mount(MountSpec::new("health", "api.example.com"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMount { .. }));
    }

    #[test]
    fn test_weak_cookie_secret_rejected() {
        let err = GatewayConfig::builder()
            .identity("https://login.example.com", "client", "secret")
            .cookie_secret("short")
            .mount(MountSpec::new("proxy", "api.example.com"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::WeakCookieSecret));
    }

    #[test]
    fn test_verbose_only_outside_production() {
        let err = base_builder()
            .mount(MountSpec::new("proxy", "api.example.com"))
            .verbose(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::VerboseInProduction));

        let config = base_builder()
            .mount(MountSpec::new("proxy", "api.example.com"))
            .environment(Environment::Development)
            .verbose(true)
            .build()
            .unwrap();
        assert!(config.verbose);
    }

    #[test]
    fn test_normalize_backend_base() {
        assert_eq!(
            normalize_backend_base("api.example.com").unwrap().as_str(),
            "https://api.example.com/"
        );
        assert_eq!(
            normalize_backend_base("http://127.0.0.1:9000/v1").unwrap().as_str(),
            "http://127.0.0.1:9000/v1"
        );
        assert!(normalize_backend_base("https://api.example.com/?a=1").is_err());
        assert!(normalize_backend_base("ftp://api.example.com").is_err());
    }

    #[test]
    fn test_api_key_header_cannot_be_authorization() {
        let mut spec = MountSpec::new("proxy", "api.example.com").with_api_key("k");
        spec.api_key_header = "Authorization".to_string();

        let err = base_builder().mount(spec).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMount { .. }));
    }

    #[test]
    fn test_mount_capture() {
        let config = base_builder()
            .mount(MountSpec::new("proxy", "api.example.com"))
            .build()
            .unwrap();
        let mount = &config.mounts[0];

        assert_eq!(mount.capture("/proxy/items/1"), Some("/items/1"));
        assert_eq!(mount.capture("/proxy"), None);
        assert_eq!(mount.capture("/proxyfoo/items"), None);
    }

    #[test]
    fn test_mounts_file_format() {
        let file: MountsFile = serde_json::from_str(
            r#"{"mounts":[
                {"prefix":"proxy","backend_base_url":"api.example.com"},
                {"prefix":"service","backend_base_url":"https://api.example.com","api_key":"k1"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(file.mounts.len(), 2);
        assert_eq!(file.mounts[0], MountSpec::new("proxy", "api.example.com"));
        assert_eq!(file.mounts[1].api_key.as_deref(), Some("k1"));
        assert_eq!(file.mounts[1].api_key_header, "x-api-key");
    }
}
