//! Git repository backend

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{info, instrument, warn};

use certsync_core::config::GitStorageConfig;
use certsync_core::{ConfigError, GitError};
use certsync_git::{CloneOptions, CommitIdentity, GitCredentials, GitRepo, PushOutcome, DEFAULT_REMOTE};

use super::{ChangeSetSnapshot, CommitRef, PublishPolicy, StorageBackend};
use crate::committer::{ChangeSet, OnConflict};
use crate::error::{Result, StoreError};
use crate::tree::{TreeState, WorkingTree};

/// Store kept on a branch of a git repository
#[derive(Debug, Clone)]
pub struct GitStorage {
    url: String,
    branch: String,
    shallow_clone: bool,
    clone_branch_directly: bool,
    identity: CommitIdentity,
    credentials: GitCredentials,
    prefix: Option<String>,
    policy: PublishPolicy,
}

impl GitStorage {
    /// Backend for `url`, storing on `branch`
    pub fn new(url: impl Into<String>, branch: impl Into<String>, policy: PublishPolicy) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
            shallow_clone: false,
            clone_branch_directly: false,
            identity: CommitIdentity::default(),
            credentials: GitCredentials::default(),
            prefix: None,
            policy,
        }
    }

    /// Backend from git storage configuration
    pub fn from_config(
        config: &GitStorageConfig,
        prefix: Option<String>,
        policy: PublishPolicy,
    ) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(ConfigError::invalid("storage.url", "git storage requires a repository URL").into());
        }
        if config.branch.trim().is_empty() {
            return Err(ConfigError::invalid("storage.branch", "branch cannot be empty").into());
        }

        Ok(Self {
            url: config.url.clone(),
            branch: config.branch.clone(),
            shallow_clone: config.shallow_clone,
            clone_branch_directly: config.clone_branch_directly,
            identity: CommitIdentity {
                name: config.git_full_name.clone(),
                email: config.git_user_email.clone(),
            },
            credentials: GitCredentials {
                private_key: config.private_key.clone(),
                basic_authorization: config.basic_authorization.clone(),
                bearer_token: config.bearer_authorization.clone(),
            },
            prefix,
            policy,
        })
    }

    /// Store files under `prefix` inside the repository
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Clone only the configured branch, failing when it doesn't exist
    pub fn with_clone_branch_directly(mut self, direct: bool) -> Self {
        self.clone_branch_directly = direct;
        self
    }

    /// Commit as this identity
    pub fn with_identity(mut self, identity: CommitIdentity) -> Self {
        self.identity = identity;
        self
    }

    fn clone_options(&self) -> CloneOptions {
        CloneOptions {
            branch: self.branch.clone(),
            clone_branch_directly: self.clone_branch_directly,
            shallow: self.shallow_clone,
            credentials: self.credentials.clone(),
        }
    }

    fn map_git_error(&self, operation: &'static str, err: GitError) -> StoreError {
        match err {
            GitError::BranchNotFound { branch, url } => StoreError::BranchNotFound { branch, url },
            e if e.is_remote_failure() => StoreError::remote(self.describe(), operation, e),
            e => StoreError::Git(e),
        }
    }
}

#[async_trait]
impl StorageBackend for GitStorage {
    fn describe(&self) -> String {
        format!("git:{}#{}", self.url, self.branch)
    }

    fn is_readonly(&self) -> bool {
        self.policy.readonly
    }

    #[instrument(skip(self), fields(backend = %self.describe()))]
    async fn sync(&self) -> Result<WorkingTree> {
        let start = std::time::Instant::now();
        let scratch = TempDir::new()?;
        let checkout = scratch.path().join("store");

        let repo = GitRepo::clone(&self.url, &checkout, &self.clone_options())
            .map_err(|e| self.map_git_error("sync", e))?;
        let head = repo.head_info()?;

        let tree = WorkingTree::new(scratch, checkout, self.prefix.as_deref())?;
        info!(
            head = head.as_ref().map(|c| c.short_hash.as_str()).unwrap_or("(empty)"),
            duration_ms = start.elapsed().as_millis() as u64,
            "synced git store"
        );
        Ok(tree)
    }

    #[instrument(skip_all, fields(backend = %self.describe(), paths = change_set.len()))]
    async fn publish(&self, tree: &mut WorkingTree, change_set: &ChangeSet) -> Result<CommitRef> {
        self.policy.ensure_writable(&self.describe())?;
        tree.require(TreeState::Encrypted)?;

        let repo = GitRepo::open(tree.checkout_root())?;
        let snapshot = ChangeSetSnapshot::capture(tree, change_set)?;
        let paths = snapshot.repo_paths(tree);
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            let Some(oid) = repo.commit_paths(&paths, change_set.message(), &self.identity)? else {
                let id = repo.head_info()?.map(|c| c.hash).unwrap_or_default();
                info!(commit = %id, "change set already present on remote");
                return Ok(CommitRef {
                    id,
                    changed: false,
                    attempts: attempt,
                });
            };

            let outcome = repo
                .push_branch(DEFAULT_REMOTE, &self.branch, &self.credentials)
                .map_err(|e| self.map_git_error("publish", e))?;

            match outcome {
                PushOutcome::Accepted => {
                    return Ok(CommitRef {
                        id: oid.to_string(),
                        changed: true,
                        attempts: attempt,
                    });
                }
                PushOutcome::Rejected(reason) => {
                    warn!(attempt, max_attempts, %reason, "remote branch moved during publish");
                    if change_set.on_conflict() == OnConflict::Fail {
                        return Err(StoreError::PublishConflict {
                            backend: self.describe(),
                            attempts: attempt,
                        });
                    }
                    if attempt == max_attempts {
                        break;
                    }
                    self.policy.backoff().await;

                    let head = repo
                        .fetch_branch(DEFAULT_REMOTE, &self.branch, &self.credentials)
                        .map_err(|e| self.map_git_error("publish", e))?;
                    if let Some(head) = head {
                        repo.reset_hard(head)?;
                    }
                    snapshot.restore(tree)?;
                    info!(attempt, "rebuilt change set on the new remote head");
                }
            }
        }

        Err(StoreError::PublishConflict {
            backend: self.describe(),
            attempts: max_attempts,
        })
    }
}
