//! Remote operations

use std::cell::RefCell;

use git2::build::CheckoutBuilder;
use git2::{Oid, ResetType};
use tracing::{info, instrument, warn};

use certsync_core::error::GitError;

use crate::auth::GitCredentials;
use crate::repository::{GitRepo, Result};

/// Name of the remote a cloned store repository points at
pub const DEFAULT_REMOTE: &str = "origin";

/// Result of pushing the store branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote accepted the update
    Accepted,
    /// The remote moved on; fetch and rebuild before retrying
    Rejected(String),
}

impl GitRepo {
    fn find_remote(&self, name: &str) -> Result<git2::Remote<'_>> {
        self.repo.find_remote(name).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                GitError::RemoteNotFound(name.to_string())
            } else {
                GitError::Git2(e)
            }
        })
    }

    /// Get the URL for a remote
    pub fn remote_url(&self, name: &str) -> Result<Option<String>> {
        Ok(self.find_remote(name)?.url().map(|s| s.to_string()))
    }

    /// Push `branch` to the same branch on `remote_name`.
    ///
    /// Non-fast-forward rejections are reported as [`PushOutcome::Rejected`].
    /// Every other failure, including a ref the remote refused for another
    /// reason (hooks, branch protection, permissions), is an error.
    #[instrument(skip(self, credentials))]
    pub fn push_branch(
        &self,
        remote_name: &str,
        branch: &str,
        credentials: &GitCredentials,
    ) -> Result<PushOutcome> {
        let start = std::time::Instant::now();
        let mut remote = self.find_remote(remote_name)?;
        let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);

        let rejection: RefCell<Option<String>> = RefCell::new(None);
        let pushed = {
            let mut callbacks = credentials.remote_callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(status) = status {
                    *rejection.borrow_mut() = Some(format!("{}: {}", refname, status));
                }
                Ok(())
            });
            let mut options = credentials.push_options(callbacks);
            remote.push(&[&refspec], Some(&mut options))
        };

        match pushed {
            Ok(()) => {}
            Err(e) if is_non_fast_forward(&e) => {
                warn!(remote = remote_name, branch, reason = e.message(), "push rejected");
                return Ok(PushOutcome::Rejected(e.message().to_string()));
            }
            Err(e) => {
                return Err(GitError::PushFailed(format!(
                    "failed to push to {}/{}: {}",
                    remote_name,
                    branch,
                    e.message()
                )))
            }
        }

        if let Some(reason) = rejection.into_inner() {
            if is_stale_base(&reason) {
                warn!(remote = remote_name, branch, %reason, "push rejected by remote");
                return Ok(PushOutcome::Rejected(reason));
            }
            return Err(GitError::PushFailed(format!(
                "remote refused {}/{}: {}",
                remote_name, branch, reason
            )));
        }

        info!(
            remote = remote_name,
            branch,
            duration_ms = start.elapsed().as_millis() as u64,
            "pushed store branch"
        );
        Ok(PushOutcome::Accepted)
    }

    /// Fetch `branch` into `refs/remotes/<remote>/<branch>` and return its head
    #[instrument(skip(self, credentials))]
    pub fn fetch_branch(
        &self,
        remote_name: &str,
        branch: &str,
        credentials: &GitCredentials,
    ) -> Result<Option<Oid>> {
        let start = std::time::Instant::now();
        let mut remote = self.find_remote(remote_name)?;
        let tracking = format!("refs/remotes/{}/{}", remote_name, branch);
        let refspec = format!("+refs/heads/{}:{}", branch, tracking);

        let mut options = credentials.fetch_options();
        remote
            .fetch(&[&refspec], Some(&mut options), None)
            .map_err(|e| GitError::FetchFailed {
                remote: remote_name.to_string(),
                reason: e.message().to_string(),
            })?;

        let head = match self.repo.find_reference(&tracking) {
            Ok(reference) => Some(reference.peel_to_commit()?.id()),
            Err(e) if e.code() == git2::ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        info!(
            remote = remote_name,
            branch,
            head = ?head.map(|oid| oid.to_string()),
            duration_ms = start.elapsed().as_millis() as u64,
            "fetched store branch"
        );
        Ok(head)
    }

    /// Move the current branch to `oid`, discarding local commits and changes
    pub fn reset_hard(&self, oid: Oid) -> Result<()> {
        let target = self.repo.find_object(oid, None)?;
        self.repo
            .reset(&target, ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
        info!(commit = %oid, "reset store branch");
        Ok(())
    }
}

fn is_non_fast_forward(error: &git2::Error) -> bool {
    error.code() == git2::ErrorCode::NotFastForward || is_stale_base(error.message())
}

/// Whether a push failure or ref status means the remote branch moved on
fn is_stale_base(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("non-fast-forward")
        || message.contains("non-fastforward")
        || message.contains("fetch first")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_remote, seed_remote};
    use crate::{CloneOptions, CommitIdentity};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn clone(url: &str, dest: &TempDir) -> GitRepo {
        let options = CloneOptions {
            branch: "master".to_string(),
            ..Default::default()
        };
        GitRepo::clone(url, &dest.path().join("store"), &options).unwrap()
    }

    fn commit_file(repo: &GitRepo, name: &str, content: &[u8]) {
        let workdir = repo.workdir().unwrap().to_path_buf();
        std::fs::write(workdir.join(name), content).unwrap();
        repo.commit_paths(&[PathBuf::from(name)], name, &CommitIdentity::default())
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_push_to_empty_remote() {
        let (_remote_dir, url) = bare_remote();
        let dest = TempDir::new().unwrap();
        let repo = clone(&url, &dest);

        commit_file(&repo, "a.txt", b"a");
        let outcome = repo
            .push_branch(DEFAULT_REMOTE, "master", &GitCredentials::default())
            .unwrap();
        assert_eq!(outcome, PushOutcome::Accepted);

        let remote = git2::Repository::open_bare(url.as_str()).unwrap();
        let head = remote.find_reference("refs/heads/master").unwrap();
        assert_eq!(head.peel_to_commit().unwrap().summary(), Some("a.txt"));
    }

    #[test]
    fn test_push_rejected_then_rebuilt() {
        let (_remote_dir, url) = bare_remote();
        seed_remote(&url, "master", "seed.txt", b"seed");
        let creds = GitCredentials::default();

        let first_dir = TempDir::new().unwrap();
        let first = clone(&url, &first_dir);
        let second_dir = TempDir::new().unwrap();
        let second = clone(&url, &second_dir);

        commit_file(&first, "first.txt", b"1");
        assert_eq!(
            first.push_branch(DEFAULT_REMOTE, "master", &creds).unwrap(),
            PushOutcome::Accepted
        );

        commit_file(&second, "second.txt", b"2");
        let outcome = second.push_branch(DEFAULT_REMOTE, "master", &creds).unwrap();
        assert!(matches!(outcome, PushOutcome::Rejected(_)));

        let head = second
            .fetch_branch(DEFAULT_REMOTE, "master", &creds)
            .unwrap()
            .unwrap();
        second.reset_hard(head).unwrap();
        let workdir = second.workdir().unwrap().to_path_buf();
        assert!(workdir.join("first.txt").exists());
        assert!(!workdir.join("second.txt").exists());

        commit_file(&second, "second.txt", b"2");
        assert_eq!(
            second.push_branch(DEFAULT_REMOTE, "master", &creds).unwrap(),
            PushOutcome::Accepted
        );
    }

    #[test]
    fn test_stale_base_classification() {
        assert!(is_stale_base("refs/heads/master: cannot push non-fastforwardable reference"));
        assert!(is_stale_base("refs/heads/master: rejected (fetch first)"));
        assert!(is_stale_base("Updates were rejected: Non-Fast-Forward"));

        assert!(!is_stale_base("refs/heads/master: pre-receive hook declined"));
        assert!(!is_stale_base("refs/heads/master: protected branch hook declined"));
        assert!(!is_stale_base("refs/heads/master: permission denied"));
    }

    #[test]
    fn test_remote_url() {
        let (_remote_dir, url) = bare_remote();
        let dest = TempDir::new().unwrap();
        let repo = clone(&url, &dest);
        assert_eq!(repo.remote_url(DEFAULT_REMOTE).unwrap().as_deref(), Some(url.as_str()));
        assert!(matches!(
            repo.remote_url("upstream"),
            Err(GitError::RemoteNotFound(_))
        ));
    }
}
