#![deny(unsafe_code)]

//! Configuration loading, validation, and policy engine for pigate.
//!
//! Three TOML sources feed the gateway:
//!
//! - the gateway config ([`AppConfig`]): listener, logging, credentials,
//!   transport limits, and where the other two files live;
//! - the target registry ([`targets::TargetRegistry`]): named SSH hosts;
//! - the policy document ([`policy::PolicyDocument`]): tool, shell and GPIO
//!   allowlists, held by a reloadable [`store::PolicyStore`].
//!
//! The first two are loaded once at startup. The policy document can be
//! swapped at runtime.

/// Tool, shell-command and GPIO allowlists.
pub mod policy;
/// Reloadable, atomically swapped policy holder.
pub mod store;
/// Named SSH targets.
pub mod targets;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};
use zeroize::Zeroizing;

pub use policy::PolicyDocument;
pub use store::PolicyStore;
pub use targets::{TargetConfig, TargetRegistry};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level gateway configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Locations of the target registry and policy document.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Caller authentication and throttling.
    #[serde(default)]
    pub security: SecurityConfig,

    /// SSH transport limits.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Policy reload behaviour.
    #[serde(default)]
    pub policy: PolicyReloadConfig,
}

/// Configuration for the HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the gateway listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port the gateway listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    8765
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "pigate_core=trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Where the target registry and policy document live.
///
/// Relative paths are resolved against the directory of the gateway config
/// file by [`AppConfig::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_hosts_path")]
    pub hosts: PathBuf,

    #[serde(default = "default_policy_path")]
    pub policy: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts_path(),
            policy: default_policy_path(),
        }
    }
}

fn default_hosts_path() -> PathBuf {
    PathBuf::from("config/hosts.toml")
}

fn default_policy_path() -> PathBuf {
    PathBuf::from("config/policy.toml")
}

/// A shared-secret API key. Zeroized on drop, never printed.
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub struct ApiKey(Zeroizing<String>);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// The raw key bytes, for constant-time comparison only.
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

/// Caller authentication and rate limiting.
///
/// ## TOML Example
///
/// ```toml
/// [security]
/// api_keys = ["change-me"]
/// jwt_public_key_path = "/etc/pigate/jwt.pem"
/// rate_limit_per_minute = 60
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Static shared secrets accepted as bearer tokens.
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,

    /// Inline PEM public key for signed-token verification.
    #[serde(default)]
    pub jwt_public_key_pem: Option<String>,

    /// Path to a PEM public key for signed-token verification.
    #[serde(default)]
    pub jwt_public_key_path: Option<PathBuf>,

    /// Calls allowed per (source address, caller) per 60 s window.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Request paths served without authentication or rate limiting.
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            jwt_public_key_pem: None,
            jwt_public_key_path: None,
            rate_limit_per_minute: default_rate_limit(),
            public_paths: default_public_paths(),
        }
    }
}

fn default_rate_limit() -> u32 {
    60
}

fn default_public_paths() -> Vec<String> {
    ["/health", "/docs", "/redoc", "/openapi.json"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// SSH transport limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Bound applied to remote commands that do not set their own timeout.
    #[serde(default = "default_exec_timeout_secs")]
    pub default_exec_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_exec_timeout_secs: default_exec_timeout_secs(),
        }
    }
}

fn default_exec_timeout_secs() -> u64 {
    120
}

/// Policy reload behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyReloadConfig {
    /// Poll interval for re-reading the policy file (0 = only on SIGHUP).
    #[serde(default)]
    pub reload_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    ///
    /// Relative paths inside the file are resolved against the file's
    /// parent directory.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config = Self::parse(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Rebase relative file references onto `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        rebase(&mut self.paths.hosts);
        rebase(&mut self.paths.policy);
        if let Some(key_path) = self.security.jwt_public_key_path.as_mut() {
            rebase(key_path);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_port == 0 {
            return Err(ConfigError::Validation(
                "server.listen_port must be non-zero".to_string(),
            ));
        }
        if self.server.listen_addr.is_empty() {
            return Err(ConfigError::Validation(
                "server.listen_addr must not be empty".to_string(),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.format must be one of {:?}, got {:?}",
                valid_formats, self.logging.format
            )));
        }

        if self.paths.hosts.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "paths.hosts must not be empty".to_string(),
            ));
        }
        if self.paths.policy.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "paths.policy must not be empty".to_string(),
            ));
        }

        let sec = &self.security;
        if sec.rate_limit_per_minute == 0 {
            return Err(ConfigError::Validation(
                "security.rate_limit_per_minute must be at least 1".to_string(),
            ));
        }
        for (i, key) in sec.api_keys.iter().enumerate() {
            if key.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "security.api_keys[{i}] must not be empty"
                )));
            }
        }
        if sec.jwt_public_key_pem.is_some() && sec.jwt_public_key_path.is_some() {
            return Err(ConfigError::Validation(
                "security.jwt_public_key_pem and security.jwt_public_key_path are mutually exclusive"
                    .to_string(),
            ));
        }
        for (i, path) in sec.public_paths.iter().enumerate() {
            if !path.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "security.public_paths[{i}] must start with '/', got {path:?}"
                )));
            }
        }

        if self.transport.default_exec_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "transport.default_exec_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether any credential source is configured at all.
    ///
    /// A gateway without credentials rejects every non-public call.
    pub fn has_credentials(&self) -> bool {
        !self.security.api_keys.is_empty()
            || self.security.jwt_public_key_pem.is_some()
            || self.security.jwt_public_key_path.is_some()
    }
}
