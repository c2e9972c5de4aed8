//! Gateway test helpers.
//!
//! [`TestGateway`] builds a [`Gateway`] over a [`FakeConnector`] with its
//! host registry and policy written to a temporary directory.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;

use pigate_core::{CallMeta, Gateway};
use tempfile::TempDir;

use crate::config::TestConfigBuilder;
use crate::fake::FakeConnector;

/// API key accepted by every [`TestGateway`].
pub const TEST_API_KEY: &str = "test-key";

/// `Authorization` header value carrying [`TEST_API_KEY`].
pub const TEST_BEARER: &str = "Bearer test-key";

/// Two targets, `pi1` and `pi2`. Key paths are never read by the fake.
pub const DEFAULT_HOSTS: &str = r#"
[targets.pi1]
host = "10.0.0.11"
username = "pi"
private_key_path = "/nonexistent/id_ed25519"

[targets.pi2]
host = "10.0.0.12"
username = "pi"
private_key_path = "/nonexistent/id_ed25519"
"#;

/// A test-scoped gateway with an owned temp directory for its files.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct TestGateway {
    pub gateway: Gateway,
    pub connector: FakeConnector,
    pub policy_path: PathBuf,
    _temp_dir: TempDir,
}

impl TestGateway {
    /// Gateway over [`DEFAULT_HOSTS`] with the given policy.
    pub async fn with_policy(policy_toml: &str) -> Self {
        Self::build(DEFAULT_HOSTS, policy_toml, TestConfigBuilder::new()).await
    }

    /// Gateway over [`DEFAULT_HOSTS`] with an empty, permissive policy.
    pub async fn permissive() -> Self {
        Self::with_policy("").await
    }

    /// Full control over hosts, policy and the rest of the config. The
    /// builder's paths are overridden and [`TEST_API_KEY`] is always added.
    pub async fn build(hosts_toml: &str, policy_toml: &str, builder: TestConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let hosts_path = temp_dir.path().join("hosts.toml");
        let policy_path = temp_dir.path().join("policy.toml");
        tokio::fs::write(&hosts_path, hosts_toml)
            .await
            .expect("failed to write test hosts");
        tokio::fs::write(&policy_path, policy_toml)
            .await
            .expect("failed to write test policy");

        let config = builder
            .hosts_path(&hosts_path)
            .policy_path(&policy_path)
            .api_key(TEST_API_KEY)
            .build();

        let connector = FakeConnector::new();
        let gateway = Gateway::with_connector(config, Arc::new(connector.clone()))
            .await
            .expect("failed to load test gateway");

        Self {
            gateway,
            connector,
            policy_path,
            _temp_dir: temp_dir,
        }
    }

    /// Overwrite the policy file and reload it.
    pub async fn set_policy(&self, policy_toml: &str) {
        tokio::fs::write(&self.policy_path, policy_toml)
            .await
            .expect("failed to write updated policy");
        self.gateway
            .reload_policy()
            .await
            .expect("failed to reload policy");
    }

    /// Call metadata for an authenticated caller on loopback.
    pub fn meta(&self) -> CallMeta<'static> {
        CallMeta {
            authorization: Some(TEST_BEARER),
            source: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}
