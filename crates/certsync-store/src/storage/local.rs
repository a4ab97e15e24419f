//! Directory backend (network share, shared volume)

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use certsync_core::config::LocalStorageConfig;
use certsync_core::ConfigError;

use super::{ChangeSetSnapshot, CommitRef, PublishPolicy, StorageBackend};
use crate::committer::{ChangeSet, OnConflict};
use crate::error::{Result, StoreError};
use crate::tree::{write_atomic, TreeState, WorkingTree, LOCK_FILE, REVISION_FILE};

/// A lock older than this is assumed abandoned by a crashed writer
const STALE_LOCK_AFTER: Duration = Duration::from_secs(10 * 60);

/// Store kept in a plain directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    prefix: Option<String>,
    policy: PublishPolicy,
}

impl LocalStorage {
    /// Backend storing into `root`
    pub fn new(root: impl Into<PathBuf>, policy: PublishPolicy) -> Self {
        Self {
            root: root.into(),
            prefix: None,
            policy,
        }
    }

    /// Backend from local storage configuration
    pub fn from_config(
        config: &LocalStorageConfig,
        prefix: Option<String>,
        policy: PublishPolicy,
    ) -> Result<Self> {
        if config.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("storage.path", "local storage requires a directory").into());
        }
        Ok(Self {
            root: config.path.clone(),
            prefix,
            policy,
        })
    }

    /// Store files under `prefix` inside the directory
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    fn ensure_reachable(&self, operation: &'static str) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(StoreError::remote(
                self.describe(),
                operation,
                format!("{} is not a directory", self.root.display()),
            ))
        }
    }

    /// Copy the store into `dest`, retrying while a writer holds the lock
    /// or published meanwhile
    async fn copy_consistent(&self, dest: &Path) -> Result<u64> {
        let lock = self.root.join(LOCK_FILE);
        for attempt in 1..=self.policy.max_attempts {
            match lock_state(&lock) {
                LockState::Held => {
                    debug!(attempt, "store is being written, waiting for the writer");
                    self.policy.backoff().await;
                    continue;
                }
                LockState::Abandoned => {
                    warn!(path = %lock.display(), "store lock was abandoned, copying anyway");
                }
                LockState::Free => {}
            }

            let before = read_revision(&self.root)?;
            copy_tree(&self.root, dest)?;
            let after = read_revision(&self.root)?;
            if before == after && lock_state(&lock) != LockState::Held {
                return Ok(after);
            }
            debug!(before, after, "store changed while copying, copying again");
            self.policy.backoff().await;
        }
        Err(StoreError::remote(
            self.describe(),
            "sync",
            "store kept changing while it was being copied",
        ))
    }

    fn try_publish(&self, tree: &WorkingTree, snapshot: &ChangeSetSnapshot) -> Result<Attempt> {
        let Some(_lock) = WriterLock::acquire(&self.root)? else {
            return Ok(Attempt::Locked);
        };

        let current = read_revision(&self.root)?;
        if Some(current) != tree.revision() {
            return Ok(Attempt::Stale { current });
        }

        let mut pending = Vec::new();
        for (path, data) in snapshot.files() {
            let target = self.root.join(tree.repo_relative(path));
            let previous = match std::fs::read(&target) {
                Ok(bytes) if bytes == *data => continue,
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(StoreError::io_at(&target, e)),
            };
            pending.push(PendingWrite {
                staged: stage_sibling(&target, data)?,
                target,
                previous,
            });
        }

        let changed = !pending.is_empty();
        apply_all(pending)?;

        let revision = if changed {
            let next = current + 1;
            write_atomic(&self.root.join(REVISION_FILE), next.to_string().as_bytes())?;
            next
        } else {
            current
        };
        Ok(Attempt::Published { revision, changed })
    }
}

/// A change-set file written next to its target but not yet in place
struct PendingWrite {
    target: PathBuf,
    staged: NamedTempFile,
    previous: Option<Vec<u8>>,
}

fn stage_sibling(target: &Path, data: &[u8]) -> Result<NamedTempFile> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| StoreError::io_at(parent, e))?;

    let mut staged = NamedTempFile::new_in(parent).map_err(|e| StoreError::io_at(parent, e))?;
    staged.write_all(data).map_err(|e| StoreError::io_at(staged.path(), e))?;
    staged.as_file().sync_all().map_err(|e| StoreError::io_at(target, e))?;
    Ok(staged)
}

/// Move every staged file into place; on failure put back what was replaced
fn apply_all(pending: Vec<PendingWrite>) -> Result<()> {
    let mut applied: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::with_capacity(pending.len());

    for write in pending {
        if let Err(e) = write.staged.persist(&write.target) {
            let err = StoreError::io_at(&write.target, e.error);
            warn!(path = %write.target.display(), error = %err, rolled_back = applied.len(), "publish failed, restoring previous files");
            for (target, previous) in applied.iter().rev() {
                let restored = match previous {
                    Some(bytes) => write_atomic(target, bytes),
                    None => std::fs::remove_file(target).map_err(|e| StoreError::io_at(target, e)),
                };
                if let Err(restore_err) = restored {
                    warn!(path = %target.display(), error = %restore_err, "failed to restore store file");
                }
            }
            return Err(err);
        }
        applied.push((write.target, write.previous));
    }
    Ok(())
}

enum Attempt {
    Published { revision: u64, changed: bool },
    Stale { current: u64 },
    Locked,
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    fn is_readonly(&self) -> bool {
        self.policy.readonly
    }

    #[instrument(skip(self), fields(backend = %self.describe()))]
    async fn sync(&self) -> Result<WorkingTree> {
        self.ensure_reachable("sync")?;
        let scratch = TempDir::new()?;
        let checkout = scratch.path().join("store");

        let revision = self.copy_consistent(&checkout).await?;
        let mut tree = WorkingTree::new(scratch, checkout, self.prefix.as_deref())?;
        tree.set_revision(Some(revision));

        info!(revision, "synced local store");
        Ok(tree)
    }

    #[instrument(skip_all, fields(backend = %self.describe(), paths = change_set.len()))]
    async fn publish(&self, tree: &mut WorkingTree, change_set: &ChangeSet) -> Result<CommitRef> {
        self.policy.ensure_writable(&self.describe())?;
        tree.require(TreeState::Encrypted)?;
        self.ensure_reachable("publish")?;

        let snapshot = ChangeSetSnapshot::capture(tree, change_set)?;
        let max_attempts = self.policy.max_attempts;
        let rebase = change_set.on_conflict() == OnConflict::Rebase;

        for attempt in 1..=max_attempts {
            let stale = match self.try_publish(tree, &snapshot)? {
                Attempt::Published { revision, changed } => {
                    tree.set_revision(Some(revision));
                    info!(revision, changed, attempt, "published to local store");
                    return Ok(CommitRef {
                        id: revision.to_string(),
                        changed,
                        attempts: attempt,
                    });
                }
                Attempt::Stale { current } => {
                    warn!(attempt, max_attempts, current, synced = ?tree.revision(), "local store moved during publish");
                    if !rebase {
                        return Err(StoreError::PublishConflict {
                            backend: self.describe(),
                            attempts: attempt,
                        });
                    }
                    true
                }
                Attempt::Locked => {
                    warn!(attempt, max_attempts, "local store is locked by another writer");
                    false
                }
            };

            if attempt == max_attempts {
                break;
            }
            self.policy.backoff().await;

            if stale {
                let revision = self.copy_consistent(tree.checkout_root()).await?;
                snapshot.restore(tree)?;
                tree.set_revision(Some(revision));
            }
        }

        Err(StoreError::PublishConflict {
            backend: self.describe(),
            attempts: max_attempts,
        })
    }
}

/// Exclusive writer lock, released on drop
struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    fn acquire(root: &Path) -> Result<Option<Self>> {
        let path = root.join(LOCK_FILE);
        remove_if_stale(&path);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "pid {}", std::process::id()) {
                    warn!(path = %path.display(), error = %e, "failed to record lock owner");
                }
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(StoreError::io_at(&path, e)),
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release store lock");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Free,
    Held,
    Abandoned,
}

fn lock_state(lock: &Path) -> LockState {
    match std::fs::metadata(lock).and_then(|m| m.modified()) {
        Ok(modified) if is_stale(modified) => LockState::Abandoned,
        Ok(_) => LockState::Held,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => LockState::Free,
        Err(_) => LockState::Held,
    }
}

fn is_stale(modified: SystemTime) -> bool {
    SystemTime::now().duration_since(modified).unwrap_or_default() > STALE_LOCK_AFTER
}

/// Take an abandoned lock out of the way.
///
/// The lock is first renamed to a name only this process uses, so of two
/// writers racing for the same abandoned lock only one moves it.
fn remove_if_stale(lock: &Path) {
    if lock_state(lock) != LockState::Abandoned {
        return;
    }
    let mut claimed = lock.as_os_str().to_owned();
    claimed.push(format!(".stale-{}", std::process::id()));
    let claimed = PathBuf::from(claimed);
    if std::fs::rename(lock, &claimed).is_err() {
        return;
    }
    release_claimed(lock, &claimed);
}

/// Delete a claimed lock, or hand it back when it turned out to be fresh
fn release_claimed(lock: &Path, claimed: &Path) {
    let still_stale = std::fs::metadata(claimed)
        .and_then(|m| m.modified())
        .map(is_stale)
        .unwrap_or(true);

    if still_stale {
        warn!(path = %lock.display(), "removing abandoned store lock");
    } else if let Err(e) = std::fs::hard_link(claimed, lock) {
        warn!(path = %lock.display(), error = %e, "could not hand back a live store lock");
    }
    if let Err(e) = std::fs::remove_file(claimed) {
        warn!(path = %claimed.display(), error = %e, "failed to remove claimed store lock");
    }
}

fn read_revision(root: &Path) -> Result<u64> {
    let path = root.join(REVISION_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) => text.trim().parse().map_err(|_| {
            StoreError::io_at(
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, "revision is not a number"),
            )
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(StoreError::io_at(&path, e)),
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(|e| StoreError::io_at(dest, e))?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        if relative == Path::new(REVISION_FILE) || relative.to_string_lossy().starts_with(LOCK_FILE) {
            continue;
        }

        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| StoreError::io_at(&target, e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target).map_err(|e| StoreError::io_at(entry.path(), e))?;
        }
    }
    Ok(())
}
