//! Shared fixtures for unit tests

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::committer::{ChangeSet, Committer};
use crate::encryption::{Encryption, EncryptionKey, KdfParams};
use crate::error::{Result, StoreError};
use crate::storage::{CommitRef, PublishPolicy, StorageBackend};
use crate::tree::{TreeState, WorkingTree};

/// Cheap Argon2 parameters so passphrase tests stay fast
pub(crate) const FAST_KDF: KdfParams = KdfParams {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};

pub(crate) fn fast_policy() -> PublishPolicy {
    PublishPolicy {
        readonly: false,
        max_attempts: 3,
        retry_backoff: Duration::ZERO,
    }
}

pub(crate) fn fast_encryption(passphrase: &str) -> Encryption {
    Encryption::new(&EncryptionKey::passphrase(passphrase), "test-store", &FAST_KDF).unwrap()
}

/// Empty tree, already decrypted
pub(crate) fn plaintext_tree() -> WorkingTree {
    let scratch = TempDir::new().unwrap();
    let checkout = scratch.path().join("store");
    std::fs::create_dir_all(&checkout).unwrap();
    let mut tree = WorkingTree::new(scratch, checkout, None).unwrap();
    tree.set_state(TreeState::Plaintext);
    tree
}

/// Write `files` into a synced tree without encryption and build their change set
pub(crate) fn stage_plain(tree: &mut WorkingTree, files: &[(&str, &str)]) -> ChangeSet {
    let encryption = Encryption::disabled();
    encryption.decrypt_files(tree).unwrap();
    let staged: Vec<_> = files
        .iter()
        .map(|(path, content)| tree.write_file(Path::new(path), content.as_bytes()).unwrap())
        .collect();
    encryption.encrypt_files(tree).unwrap();
    Committer::prepare(tree, &staged, "test change").unwrap()
}

/// Empty bare git repository usable as a remote
pub(crate) fn bare_remote() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let repo = git2::Repository::init_bare(dir.path()).unwrap();
    repo.set_head("refs/heads/master").unwrap();
    let url = dir.path().to_str().unwrap().to_string();
    (dir, url)
}

/// Backend double that counts calls and keeps nothing
#[derive(Default)]
pub(crate) struct RecordingBackend {
    pub readonly: bool,
    pub syncs: AtomicUsize,
    pub publishes: AtomicUsize,
}

impl RecordingBackend {
    pub(crate) fn readonly() -> Self {
        Self {
            readonly: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    fn describe(&self) -> String {
        "recording".to_string()
    }

    fn is_readonly(&self) -> bool {
        self.readonly
    }

    async fn sync(&self) -> Result<WorkingTree> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        let scratch = TempDir::new()?;
        let checkout = scratch.path().join("store");
        std::fs::create_dir_all(&checkout)?;
        WorkingTree::new(scratch, checkout, None)
    }

    async fn publish(&self, tree: &mut WorkingTree, change_set: &ChangeSet) -> Result<CommitRef> {
        if self.readonly {
            return Err(StoreError::ReadOnlyViolation {
                backend: self.describe(),
            });
        }
        tree.require(TreeState::Encrypted)?;
        let count = self.publishes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CommitRef {
            id: format!("recorded-{}", count),
            changed: !change_set.is_empty(),
            attempts: 1,
        })
    }
}
