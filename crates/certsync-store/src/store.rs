//! Credential store facade

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use certsync_core::config::{load_config_from_dir, Config, DEFAULT_MAX_PUBLISH_ATTEMPTS};

use crate::committer::{Committer, OnConflict, PublishedChangeSet};
use crate::encryption::{rekey, Encryption};
use crate::error::{Result, StoreError};
use crate::storage::{for_config, StorageBackend};

/// A configured store: backend, encryption and publishing rules
pub struct CredentialStore {
    pub(crate) committer: Committer,
    pub(crate) encryption: Encryption,
    pub(crate) skip_docs: bool,
    pub(crate) rekey_attempts: u32,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("backend", &self.committer.backend().describe())
            .field("encryption", &self.encryption)
            .field("skip_docs", &self.skip_docs)
            .field("rekey_attempts", &self.rekey_attempts)
            .finish()
    }
}

impl CredentialStore {
    /// Store over an explicit backend and encryption layer
    pub fn new(backend: Arc<dyn StorageBackend>, encryption: Encryption) -> Self {
        Self {
            committer: Committer::new(backend),
            encryption,
            skip_docs: false,
            rekey_attempts: DEFAULT_MAX_PUBLISH_ATTEMPTS,
        }
    }

    /// Don't write a README into stores that lack one
    pub fn with_skip_docs(mut self, skip_docs: bool) -> Self {
        self.skip_docs = skip_docs;
        self
    }

    /// Store from configuration; secrets are read from the configured environment variables
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = for_config(config)?;
        let encryption = Encryption::from_config(&config.encryption)?;
        let mut store = Self::new(backend, encryption).with_skip_docs(config.skip_docs);
        store.rekey_attempts = config.publish.max_attempts.max(1);
        Ok(store)
    }

    /// Store from the configuration file found in `dir` or its parents
    pub fn discover(dir: &Path) -> Result<Self> {
        let (config, path) = load_config_from_dir(dir)?;
        info!(config = %path.display(), "using store configuration");
        Self::from_config(&config)
    }

    /// Backend the store publishes through
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.committer.backend()
    }

    /// Encryption layer in use
    pub fn encryption(&self) -> &Encryption {
        &self.encryption
    }

    /// Re-encrypt the whole store under `new_encryption` and publish it as one change set.
    ///
    /// A concurrent publish is never rebased onto: its files would still be
    /// under the old key. The store is synced and re-keyed from scratch instead.
    /// On success the store uses the new key from then on.
    #[instrument(skip_all, fields(backend = %self.backend().describe()))]
    pub async fn change_passphrase(&mut self, new_encryption: Encryption) -> Result<Option<PublishedChangeSet>> {
        let max_attempts = self.rekey_attempts;

        for attempt in 1..=max_attempts {
            let mut tree = self.backend().sync().await?;
            let files = rekey(&mut tree, &self.encryption, &new_encryption)?;

            if files.is_empty() {
                info!("store is empty, nothing to re-encrypt");
                self.encryption = new_encryption;
                return Ok(None);
            }

            let staged = files
                .iter()
                .map(|path| tree.stage_existing(path))
                .collect::<Result<Vec<_>>>()?;
            let summary = format!("[certsync] Re-encrypt {} files with a new key", staged.len());

            match self
                .committer
                .commit_with(&mut tree, &staged, &summary, OnConflict::Fail)
                .await
            {
                Ok(published) => {
                    self.encryption = new_encryption;
                    info!(files = staged.len(), attempt, commit = %published.commit.id, "store re-encrypted");
                    return Ok(Some(published));
                }
                Err(StoreError::PublishConflict { .. }) => {
                    warn!(attempt, max_attempts, "store changed during re-encryption, starting over");
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::PublishConflict {
            backend: self.backend().describe(),
            attempts: max_attempts,
        })
    }
}
