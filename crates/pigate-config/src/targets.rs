//! Target registry — named SSH hosts the gateway may reach.
//!
//! ## TOML Example
//!
//! ```toml
//! [targets.pi-lan]
//! host = "192.168.1.50"
//! username = "pi"
//! private_key_path = "/home/gw/.ssh/id_ed25519"
//! known_hosts_path = "/home/gw/.ssh/known_hosts"
//! connect_timeout_secs = 10
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Connection parameters for one remote machine.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    /// Registry key. Filled in from the table name when loading.
    #[serde(skip)]
    pub name: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    /// Private key used for public-key authentication.
    pub private_key_path: PathBuf,

    /// When set, unknown or changed host keys are rejected.
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl TargetConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// Key locations stay out of logs and error messages.
impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key_path", &"[REDACTED]")
            .field("known_hosts_path", &self.known_hosts_path)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct HostsFile {
    #[serde(default)]
    targets: BTreeMap<String, TargetConfig>,
}

/// Immutable mapping of target name to connection parameters.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: BTreeMap<String, TargetConfig>,
}

impl TargetRegistry {
    /// Load the registry from a TOML file using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse the registry from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let file: HostsFile = toml::from_str(s)?;
        let mut targets = BTreeMap::new();
        for (name, mut target) in file.targets {
            target.name = name.clone();
            validate_target(&target)?;
            targets.insert(name, target);
        }
        Ok(Self { targets })
    }

    /// Build a registry from already-constructed targets.
    pub fn from_targets(list: impl IntoIterator<Item = TargetConfig>) -> Result<Self, ConfigError> {
        let mut targets = BTreeMap::new();
        for target in list {
            validate_target(&target)?;
            if targets.contains_key(&target.name) {
                return Err(ConfigError::Validation(format!(
                    "duplicate target {:?}",
                    target.name
                )));
            }
            targets.insert(target.name.clone(), target);
        }
        Ok(Self { targets })
    }

    pub fn get(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.get(name)
    }

    /// Target names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn validate_target(t: &TargetConfig) -> Result<(), ConfigError> {
    let name = &t.name;
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "target name must not be empty".to_string(),
        ));
    }
    if t.host.is_empty() {
        return Err(ConfigError::Validation(format!(
            "targets.{name}.host must not be empty"
        )));
    }
    if t.port == 0 {
        return Err(ConfigError::Validation(format!(
            "targets.{name}.port must be non-zero"
        )));
    }
    if t.username.is_empty() {
        return Err(ConfigError::Validation(format!(
            "targets.{name}.username must not be empty"
        )));
    }
    if t.private_key_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(format!(
            "targets.{name}.private_key_path must not be empty"
        )));
    }
    if t.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(format!(
            "targets.{name}.connect_timeout_secs must be at least 1"
        )));
    }
    Ok(())
}
