//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::Path;

use pigate_config::{AppConfig, ApiKey};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .api_key("secret")
///     .rate_limit_per_minute(5)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.config.server.listen_addr = addr.to_string();
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.server.listen_port = port;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn hosts_path(mut self, path: &Path) -> Self {
        self.config.paths.hosts = path.to_path_buf();
        self
    }

    pub fn policy_path(mut self, path: &Path) -> Self {
        self.config.paths.policy = path.to_path_buf();
        self
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.config.security.api_keys.push(ApiKey::new(key));
        self
    }

    pub fn jwt_public_key_pem(mut self, pem: &str) -> Self {
        self.config.security.jwt_public_key_pem = Some(pem.to_string());
        self
    }

    pub fn rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.config.security.rate_limit_per_minute = limit;
        self
    }

    pub fn public_path(mut self, path: &str) -> Self {
        self.config.security.public_paths.push(path.to_string());
        self
    }

    pub fn exec_timeout_secs(mut self, secs: u64) -> Self {
        self.config.transport.default_exec_timeout_secs = secs;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
