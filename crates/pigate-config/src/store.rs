//! Reloadable policy holder.
//!
//! Readers take a cheap [`Arc`] snapshot of the current document and keep
//! using it for the rest of their request. A reload swaps the whole document
//! at once; a reload that fails to parse or validate leaves the previous
//! document in force.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use crate::ConfigError;
use crate::policy::PolicyDocument;

/// Owns the active [`PolicyDocument`] and knows where to re-read it from.
#[derive(Debug)]
pub struct PolicyStore {
    source: Option<PathBuf>,
    tx: watch::Sender<Arc<PolicyDocument>>,
}

impl PolicyStore {
    /// Load the policy at `path`. A missing file yields the default policy;
    /// a malformed one is an error.
    pub async fn open(path: &Path) -> Result<Self, ConfigError> {
        let doc = PolicyDocument::load_or_default(path).await?;
        let (tx, _rx) = watch::channel(Arc::new(doc));
        Ok(Self {
            source: Some(path.to_path_buf()),
            tx,
        })
    }

    /// A store with a fixed document and no backing file.
    pub fn from_document(doc: PolicyDocument) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(doc));
        Self { source: None, tx }
    }

    /// The file this store reloads from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Snapshot of the active policy.
    pub fn current(&self) -> Arc<PolicyDocument> {
        self.tx.borrow().clone()
    }

    /// Re-read the backing file and swap it in if it is valid.
    ///
    /// On failure the previous document stays active and the error is
    /// returned. Returns `Ok(false)` when the store has no backing file.
    pub async fn refresh(&self) -> Result<bool, ConfigError> {
        let Some(path) = self.source.as_deref() else {
            return Ok(false);
        };
        match PolicyDocument::load(path).await {
            Ok(doc) => {
                self.replace(doc);
                tracing::info!(path = %path.display(), "Policy reloaded");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Policy reload failed, keeping previous policy"
                );
                Err(e)
            }
        }
    }

    /// Swap in an already-validated document.
    pub fn replace(&self, doc: PolicyDocument) {
        self.tx.send_replace(Arc::new(doc));
    }

    /// Subscribe to policy changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PolicyDocument>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STRICT: &str = r#"
        enabled_tools = ["git_status"]
    "#;

    #[tokio::test]
    async fn test_open_missing_file_is_permissive() {
        let tmp = TempDir::new().unwrap();
        let store = PolicyStore::open(&tmp.path().join("policy.toml"))
            .await
            .unwrap();
        assert!(store.current().tool_allowed("ssh_exec", None).is_allowed());
    }

    #[tokio::test]
    async fn test_open_malformed_file_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.toml");
        tokio::fs::write(&path, b"enabled_tools = [").await.unwrap();
        assert!(PolicyStore::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_swaps_document() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.toml");
        tokio::fs::write(&path, b"").await.unwrap();

        let store = PolicyStore::open(&path).await.unwrap();
        let before = store.current();
        assert!(before.tool_allowed("ssh_exec", None).is_allowed());

        tokio::fs::write(&path, STRICT).await.unwrap();
        assert!(store.refresh().await.unwrap());

        assert!(!store.current().tool_allowed("ssh_exec", None).is_allowed());
        // A snapshot taken earlier is unaffected.
        assert!(before.tool_allowed("ssh_exec", None).is_allowed());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_policy() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.toml");
        tokio::fs::write(&path, STRICT).await.unwrap();

        let store = PolicyStore::open(&path).await.unwrap();
        tokio::fs::write(&path, b"[gpio.lab1]\nagent_path = \"\"\n")
            .await
            .unwrap();

        assert!(store.refresh().await.is_err());
        let doc = store.current();
        assert!(doc.tool_allowed("git_status", None).is_allowed());
        assert!(!doc.tool_allowed("ssh_exec", None).is_allowed());
    }

    #[tokio::test]
    async fn test_refresh_after_file_removed_fails_closed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.toml");
        tokio::fs::write(&path, STRICT).await.unwrap();

        let store = PolicyStore::open(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert!(store.refresh().await.is_err());
        assert!(!store.current().tool_allowed("ssh_exec", None).is_allowed());
    }

    #[tokio::test]
    async fn test_subscribers_see_replacement() {
        let store = PolicyStore::from_document(PolicyDocument::default());
        let mut rx = store.subscribe();
        assert!(store.refresh().await.is_ok_and(|reloaded| !reloaded));

        store.replace(PolicyDocument::parse(STRICT).unwrap());
        rx.changed().await.unwrap();
        assert!(!rx.borrow().tool_allowed("ssh_exec", None).is_allowed());
    }
}
