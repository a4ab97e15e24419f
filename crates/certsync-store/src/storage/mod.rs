//! Storage backends
//!
//! A backend mirrors the remote store into a scratch [`WorkingTree`] and
//! publishes change sets from it. Git, cloud bucket and local directory
//! stores are supported.

mod bucket;
mod git;
mod local;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use certsync_core::config::{Config, StorageConfig};

use crate::committer::ChangeSet;
use crate::error::{Result, StoreError};
use crate::tree::{write_atomic, WorkingTree};

pub use bucket::BucketStorage;
pub use git::GitStorage;
pub use local::LocalStorage;

/// Storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Human readable identity, e.g. the repository URL
    fn describe(&self) -> String;

    /// Whether publishing is refused
    fn is_readonly(&self) -> bool;

    /// Fetch the latest remote state into a fresh working tree
    async fn sync(&self) -> Result<WorkingTree>;

    /// Publish exactly the files in `change_set`, retrying on concurrent updates
    async fn publish(&self, tree: &mut WorkingTree, change_set: &ChangeSet) -> Result<CommitRef>;
}

/// Where a publish landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    /// Commit sha or store revision
    pub id: String,
    /// False when the change set matched the remote already
    pub changed: bool,
    /// Attempts used, 1 when there was no conflict
    pub attempts: u32,
}

/// Read-only flag and retry limits shared by all backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPolicy {
    /// Refuse to publish
    pub readonly: bool,
    /// Attempts before giving up with a conflict
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_backoff: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PublishPolicy {
    /// Policy from the top-level configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            readonly: config.readonly,
            max_attempts: config.publish.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.publish.retry_backoff_ms),
        }
    }

    /// Fail with [`StoreError::ReadOnlyViolation`] when publishing is disabled
    pub fn ensure_writable(&self, backend: &str) -> Result<()> {
        if self.readonly {
            Err(StoreError::ReadOnlyViolation {
                backend: backend.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Sleep before the next attempt
    pub(crate) async fn backoff(&self) {
        if !self.retry_backoff.is_zero() {
            tokio::time::sleep(self.retry_backoff).await;
        }
    }
}

/// Bytes of every change-set path, kept so a retry can re-apply them
/// on top of a freshly synced remote state.
pub(crate) struct ChangeSetSnapshot {
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl ChangeSetSnapshot {
    pub(crate) fn capture(tree: &WorkingTree, change_set: &ChangeSet) -> Result<Self> {
        let files = change_set
            .paths()
            .map(|path| Ok((path.to_path_buf(), tree.read_file(path)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { files })
    }

    pub(crate) fn restore(&self, tree: &WorkingTree) -> Result<()> {
        for (path, data) in &self.files {
            write_atomic(&tree.path_for(path), data)?;
            debug!(path = %path.display(), "re-applied change set file");
        }
        Ok(())
    }

    /// Paths relative to the checkout root
    pub(crate) fn repo_paths(&self, tree: &WorkingTree) -> Vec<PathBuf> {
        self.files.iter().map(|(p, _)| tree.repo_relative(p)).collect()
    }

    pub(crate) fn files(&self) -> &[(PathBuf, Vec<u8>)] {
        &self.files
    }
}

/// Build the backend described by `config`
pub fn for_config(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    let policy = PublishPolicy::from_config(config);
    let prefix = config.prefix.clone();

    let backend: Arc<dyn StorageBackend> = match &config.storage {
        StorageConfig::Git(git) => Arc::new(GitStorage::from_config(git, prefix, policy)?),
        StorageConfig::Bucket(bucket) => Arc::new(BucketStorage::from_config(bucket, prefix, policy)?),
        StorageConfig::Local(local) => Arc::new(LocalStorage::from_config(local, prefix, policy)?),
    };

    debug!(backend = %backend.describe(), mode = config.storage.mode_name(), "storage backend selected");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use certsync_core::config::{GitStorageConfig, LocalStorageConfig, PublishConfig};

    #[test]
    fn test_policy_from_config() {
        let config = Config {
            readonly: true,
            publish: PublishConfig {
                max_attempts: 5,
                retry_backoff_ms: 20,
            },
            ..Default::default()
        };
        let policy = PublishPolicy::from_config(&config);
        assert!(policy.readonly);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.retry_backoff, Duration::from_millis(20));
        assert!(matches!(
            policy.ensure_writable("git"),
            Err(StoreError::ReadOnlyViolation { .. })
        ));
    }

    #[test]
    fn test_for_config_selects_mode() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config {
            storage: StorageConfig::Local(LocalStorageConfig {
                path: temp.path().to_path_buf(),
            }),
            ..Default::default()
        };
        let backend = for_config(&config).unwrap();
        assert!(backend.describe().starts_with("local:"));
        assert!(!backend.is_readonly());

        let config = Config {
            storage: StorageConfig::Git(GitStorageConfig {
                url: "https://example.com/certs.git".to_string(),
                ..Default::default()
            }),
            readonly: true,
            ..Default::default()
        };
        let backend = for_config(&config).unwrap();
        assert_eq!(backend.describe(), "git:https://example.com/certs.git#master");
        assert!(backend.is_readonly());
    }

    #[test]
    fn test_git_without_url_rejected() {
        let result = for_config(&Config::default());
        assert!(matches!(result, Err(StoreError::Config(_))));
    }
}
