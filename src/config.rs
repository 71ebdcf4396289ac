//! Configuration for the session gateway

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Session store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Session lifetime in hours. Expiry forces a fresh sign-in; nothing
    /// renews a live session.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,

    /// Seconds between background sweeps for expired sessions.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Where the browser lands after the OAuth callback (the dashboard URL).
    #[serde(default = "default_post_login_url")]
    pub post_login_url: String,

    /// Admin sign-in credentials. Admin login stays disabled until both are
    /// set.
    #[serde(default)]
    pub admin: AdminConfig,

    /// OAuth client settings for user sign-in.
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Log level filter string.
    /// Set via config file or DGT_LOG_LEVEL env var. Overridden by RUST_LOG.
    /// Default: "dashgate=debug,tower_http=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// JSON file store for normal operation
    File {
        /// Path of the session blob
        path: PathBuf,
    },

    /// Process-memory store for development; sessions die with the process
    Memory,
}

/// Shared admin credential, compared in constant time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AdminConfig {
    /// Admin login is enabled only when both credentials are configured.
    pub fn enabled(&self) -> bool {
        self.credential_pair().is_some()
    }

    fn credential_pair(&self) -> Option<(&str, &str)> {
        let username = self.username.as_deref().filter(|v| !v.is_empty())?;
        let password = self.password.as_deref().filter(|v| !v.is_empty())?;
        Some((username, password))
    }

    /// Compare both fields in constant time. Both comparisons always run, so
    /// a wrong username costs the same as a wrong password.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        use subtle::ConstantTimeEq;
        let Some((expected_user, expected_pass)) = self.credential_pair() else {
            return false;
        };
        let user_ok = username.as_bytes().ct_eq(expected_user.as_bytes());
        let pass_ok = password.as_bytes().ct_eq(expected_pass.as_bytes());
        bool::from(user_ok & pass_ok)
    }
}

/// OAuth client settings. Endpoint defaults point at Google; tests swap in a
/// local provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Registered callback URL. Trailing slashes are stripped before use;
    /// providers match this as an exact string.
    pub redirect_uri: Option<String>,
    /// Email domain allowed to sign in (with or without a leading `@`).
    pub allowed_domain: Option<String>,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub scopes: Vec<String>,
    /// Timeout for each provider request (token exchange, userinfo).
    pub request_timeout_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            allowed_domain: None,
            auth_endpoint: default_auth_endpoint(),
            token_endpoint: default_token_endpoint(),
            userinfo_endpoint: default_userinfo_endpoint(),
            scopes: default_scopes(),
            request_timeout_secs: default_oauth_timeout_secs(),
        }
    }
}

impl OAuthConfig {
    /// True when every field the sign-in flow needs is present.
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.client_id)
            && set(&self.client_secret)
            && set(&self.redirect_uri)
            && set(&self.allowed_domain)
    }
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8300".parse().unwrap()
}

fn default_session_ttl_hours() -> u64 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_post_login_url() -> String {
    "/".to_string()
}

fn default_auth_endpoint() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_endpoint() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_userinfo_endpoint() -> String {
    "https://openidconnect.googleapis.com/v1/userinfo".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "email".to_string(),
        "profile".to_string(),
    ]
}

fn default_oauth_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "dashgate=debug,tower_http=debug".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            path: PathBuf::from("./sessions.json"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            store: StoreConfig::default(),
            session_ttl_hours: default_session_ttl_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            post_login_url: default_post_login_url(),
            admin: AdminConfig::default(),
            oauth: OAuthConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("DGT_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if std::env::var("DGT_STORE").map(|v| v == "memory").unwrap_or(false) {
            config.store = StoreConfig::Memory;
        } else if let Ok(path) = std::env::var("DGT_STORE_PATH") {
            config.store = StoreConfig::File {
                path: PathBuf::from(path),
            };
        }

        if let Ok(hours) = std::env::var("DGT_SESSION_TTL_HOURS") {
            if let Ok(parsed) = hours.parse() {
                config.session_ttl_hours = parsed;
            }
        }

        if let Ok(secs) = std::env::var("DGT_SWEEP_INTERVAL_SECS") {
            if let Ok(parsed) = secs.parse() {
                config.sweep_interval_secs = parsed;
            }
        }

        if let Some(url) = env_nonempty("DGT_POST_LOGIN_URL") {
            config.post_login_url = url;
        }

        config.admin.username = env_nonempty("DGT_ADMIN_USERNAME");
        config.admin.password = env_nonempty("DGT_ADMIN_PASSWORD");

        config.oauth.client_id = env_nonempty("DGT_OAUTH_CLIENT_ID");
        config.oauth.client_secret = env_nonempty("DGT_OAUTH_CLIENT_SECRET");
        config.oauth.redirect_uri = env_nonempty("DGT_OAUTH_REDIRECT_URI");
        config.oauth.allowed_domain = env_nonempty("DGT_OAUTH_ALLOWED_DOMAIN");

        // Log level (runtime operational)
        if let Ok(level) = std::env::var("DGT_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        // Try config file first
        if let Ok(path) = std::env::var("DGT_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        // Try default config file locations
        for path in &["dashgate.toml", "/etc/dashgate/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        // Fall back to environment variables
        Self::from_env()
    }

    /// Ttl of newly issued sessions.
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    /// Store label for logs and the build-info metric.
    pub fn store_kind(&self) -> &'static str {
        match self.store {
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
