//! Gateway process — startup, policy reload, and shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, interval_at};
use tracing::{info, warn};

use pigate_config::{AppConfig, PolicyStore, TargetRegistry};

use crate::auth::Authenticator;
use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::rate_limit::RateLimiter;
use crate::server::{self, AppState};
use crate::transport::{Connector, SshConnector, Transport};

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// A loaded gateway: targets, policy and credentials resolved, ready to
/// serve.
pub struct Gateway {
    config: AppConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Gateway {
    /// Load targets, policy and credentials and connect over real SSH.
    ///
    /// A missing or malformed target registry, a malformed policy file or
    /// an unreadable signing key is fatal.
    pub async fn load(config: AppConfig) -> Result<Self, GatewayError> {
        let timeout = Duration::from_secs(config.transport.default_exec_timeout_secs);
        Self::with_connector(config, Arc::new(SshConnector::new(timeout))).await
    }

    /// [`load`](Self::load) with a caller-supplied connector.
    pub async fn with_connector(
        config: AppConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, GatewayError> {
        let registry = TargetRegistry::load(&config.paths.hosts)
            .await
            .map_err(|e| {
                GatewayError::Config(format!(
                    "cannot load targets from {}: {e}",
                    config.paths.hosts.display()
                ))
            })?;
        let policy = PolicyStore::open(&config.paths.policy).await.map_err(|e| {
            GatewayError::Config(format!(
                "cannot load policy from {}: {e}",
                config.paths.policy.display()
            ))
        })?;
        let authenticator = Authenticator::from_config(&config.security).await?;

        if !config.has_credentials() {
            warn!("No API keys or token key configured; every non-public call will be rejected");
        }

        let transport = Transport::new(
            connector,
            Duration::from_secs(config.transport.default_exec_timeout_secs),
        );
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(policy),
            transport,
            Arc::new(authenticator),
            Arc::new(RateLimiter::new(config.security.rate_limit_per_minute)),
        );

        info!(targets = dispatcher.registry().len(), "Gateway loaded");

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            dispatcher: Arc::new(dispatcher),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// State for the HTTP router.
    pub fn state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            public_paths: self.config.security.public_paths.clone(),
        })
    }

    /// Re-read the policy file now.
    pub async fn reload_policy(&self) -> Result<bool, GatewayError> {
        Ok(self.dispatcher.policy().refresh().await?)
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr = format!(
            "{}:{}",
            self.config.server.listen_addr, self.config.server.listen_port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::Config(format!("cannot bind {addr}: {e}")))?;
        self.run_on(listener).await
    }

    /// Serve on an already bound listener until Ctrl-C or
    /// [`shutdown`](Self::shutdown).
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), GatewayError> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "pigate gateway listening");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let server = tokio::spawn(server::serve(
            listener,
            self.state(),
            self.shutdown_tx.subscribe(),
        ));
        let reload = spawn_reload_task(
            Arc::clone(self.dispatcher.policy()),
            reload_interval(&self.config),
            self.shutdown_tx.subscribe(),
        );

        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping gateway");
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, initiating graceful shutdown");
                let _ = self.shutdown_tx.send(ShutdownSignal);
            }
        }

        let served = server
            .await
            .map_err(|e| GatewayError::Config(format!("server task failed: {e}")))?;
        let _ = reload.await;
        served.map_err(|e| GatewayError::Config(format!("server error: {e}")))?;

        info!("Gateway stopped");
        Ok(())
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }
}

fn reload_interval(config: &AppConfig) -> Option<Duration> {
    match config.policy.reload_interval_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

/// Refresh the policy on SIGHUP and, when configured, on a fixed interval.
///
/// A failed refresh is logged by the store and the previous policy stays
/// in force.
pub fn spawn_reload_task(
    policy: Arc<PolicyStore>,
    every: Option<Duration>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = every.map(|period| interval_at(Instant::now() + period, period));
        let mut hangup = Hangup::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = hangup.recv() => {
                    info!("SIGHUP received, reloading policy");
                    let _ = policy.refresh().await;
                }
                _ = tick(&mut ticker) => {
                    let _ = policy.refresh().await;
                }
            }
        }
    })
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
struct Hangup(Option<tokio::signal::unix::Signal>);

#[cfg(unix)]
impl Hangup {
    fn new() -> Self {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::hangup()) {
            Ok(stream) => Self(Some(stream)),
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGHUP; policy reload on signal disabled");
                Self(None)
            }
        }
    }

    async fn recv(&mut self) {
        match self.0.as_mut() {
            Some(stream) => {
                if stream.recv().await.is_none() {
                    self.0 = None;
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    fn new() -> Self {
        Self
    }

    async fn recv(&mut self) {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pigate_config::PolicyDocument;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_hosts_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.paths.hosts = dir.path().join("absent.toml");
        config.paths.policy = dir.path().join("policy.toml");

        let err = Gateway::load(config).await.err().unwrap();
        assert!(matches!(err, GatewayError::Config(m) if m.contains("absent.toml")));
    }

    #[tokio::test]
    async fn test_malformed_policy_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hosts.toml"), "").unwrap();
        std::fs::write(dir.path().join("policy.toml"), "enabled_tools = 5").unwrap();
        let mut config = AppConfig::default();
        config.paths.hosts = dir.path().join("hosts.toml");
        config.paths.policy = dir.path().join("policy.toml");

        assert!(Gateway::load(config).await.is_err());
    }

    #[tokio::test]
    async fn test_reload_task_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, r#"enabled_tools = ["ssh_exec"]"#).unwrap();

        let store = Arc::new(PolicyStore::open(&path).await.unwrap());
        let mut changes = store.subscribe();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_reload_task(
            Arc::clone(&store),
            Some(Duration::from_millis(20)),
            shutdown_rx,
        );

        std::fs::write(&path, r#"enabled_tools = ["git_status"]"#).unwrap();
        tokio::time::timeout(Duration::from_secs(5), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(store.current().enabled_tools.contains("git_status"));

        shutdown_tx.send(ShutdownSignal).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_task_stops_on_shutdown_without_interval() {
        let store = Arc::new(PolicyStore::from_document(PolicyDocument::default()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_reload_task(store, None, shutdown_rx);
        shutdown_tx.send(ShutdownSignal).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_reload_interval_zero_disables() {
        let mut config = AppConfig::default();
        assert_eq!(reload_interval(&config), None);
        config.policy.reload_interval_secs = 30;
        assert_eq!(reload_interval(&config), Some(Duration::from_secs(30)));
    }
}
