//! Git repository operations

use std::path::{Path, PathBuf};

use git2::build::RepoBuilder;
use git2::Repository;
use tracing::{info, instrument};

use certsync_core::error::GitError;

use crate::auth::GitCredentials;
use crate::types::CommitInfo;

/// Result type for git operations
pub type Result<T> = std::result::Result<T, GitError>;

/// How to clone the store repository
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Branch holding the store
    pub branch: String,
    /// Clone only `branch`; fail when it doesn't exist remotely
    pub clone_branch_directly: bool,
    /// Clone with depth 1
    pub shallow: bool,
    /// Remote authentication
    pub credentials: GitCredentials,
}

/// Git repository wrapper
pub struct GitRepo {
    pub(crate) repo: Repository,
    path: PathBuf,
}

impl GitRepo {
    /// Open a repository at the given path
    #[instrument(fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                GitError::RepositoryNotFound(path.to_path_buf())
            } else {
                GitError::OpenFailed(e.to_string())
            }
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            repo,
        })
    }

    /// Clone `url` into `dest` and check out the configured branch.
    ///
    /// Without `clone_branch_directly` a branch missing on the remote is
    /// started as an empty orphan branch, to be created by the first push.
    #[instrument(skip(options), fields(branch = %options.branch))]
    pub fn clone(url: &str, dest: &Path, options: &CloneOptions) -> Result<Self> {
        let start = std::time::Instant::now();

        let mut fetch = options.credentials.fetch_options();
        if options.shallow {
            fetch.depth(1);
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch);
        if options.clone_branch_directly {
            builder.branch(&options.branch);
        }

        let repo = builder.clone(url, dest).map_err(|e| {
            let missing_branch = e.class() == git2::ErrorClass::Reference
                || e.message().contains(&format!("refs/remotes/origin/{}", options.branch));
            if options.clone_branch_directly && missing_branch {
                GitError::BranchNotFound {
                    branch: options.branch.clone(),
                    url: url.to_string(),
                }
            } else {
                GitError::CloneFailed {
                    url: url.to_string(),
                    reason: e.message().to_string(),
                }
            }
        })?;

        let git_repo = Self {
            repo,
            path: dest.to_path_buf(),
        };

        if !options.clone_branch_directly {
            git_repo.checkout_store_branch(crate::remote::DEFAULT_REMOTE, &options.branch)?;
        }

        info!(
            url,
            branch = %options.branch,
            shallow = options.shallow,
            duration_ms = start.elapsed().as_millis() as u64,
            "cloned store repository"
        );
        Ok(git_repo)
    }

    /// Get the repository path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the workdir path
    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    /// Get a reference to the inner git2 Repository
    pub fn inner(&self) -> &Repository {
        &self.repo
    }

    /// Get the HEAD commit, or `None` on an unborn branch
    pub fn head_commit(&self) -> Result<Option<git2::Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Describe the HEAD commit
    pub fn head_info(&self) -> Result<Option<CommitInfo>> {
        Ok(self.head_commit()?.map(|c| CommitInfo::from_commit(&c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_remote, seed_remote};
    use tempfile::TempDir;

    #[test]
    fn test_open_repo() {
        let temp = TempDir::new().unwrap();
        Repository::init(temp.path()).unwrap();
        let repo = GitRepo::open(temp.path()).unwrap();
        assert!(repo.head_commit().unwrap().is_none());
    }

    #[test]
    fn test_not_a_repo() {
        let temp = TempDir::new().unwrap();
        let result = GitRepo::open(temp.path());
        assert!(matches!(result, Err(GitError::RepositoryNotFound(_))));
    }

    #[test]
    fn test_clone_empty_remote() {
        let (_remote_dir, url) = bare_remote();
        let dest = TempDir::new().unwrap();

        let options = CloneOptions {
            branch: "master".to_string(),
            ..Default::default()
        };
        let repo = GitRepo::clone(&url, &dest.path().join("store"), &options).unwrap();
        assert!(repo.head_commit().unwrap().is_none());
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("master"));
    }

    #[test]
    fn test_clone_existing_branch() {
        let (_remote_dir, url) = bare_remote();
        seed_remote(&url, "master", "certs/seed.txt", b"seed");
        let dest = TempDir::new().unwrap();

        let options = CloneOptions {
            branch: "master".to_string(),
            clone_branch_directly: true,
            ..Default::default()
        };
        let repo = GitRepo::clone(&url, &dest.path().join("store"), &options).unwrap();
        let head = repo.head_info().unwrap().unwrap();
        assert_eq!(head.message, "seed");
        assert!(dest.path().join("store/certs/seed.txt").exists());
    }

    #[test]
    fn test_clone_branch_directly_missing_branch() {
        let (_remote_dir, url) = bare_remote();
        seed_remote(&url, "master", "seed.txt", b"seed");
        let dest = TempDir::new().unwrap();

        let options = CloneOptions {
            branch: "team-b".to_string(),
            clone_branch_directly: true,
            ..Default::default()
        };
        let result = GitRepo::clone(&url, &dest.path().join("store"), &options);
        assert!(matches!(result, Err(GitError::BranchNotFound { .. })));
    }

    #[test]
    fn test_clone_missing_branch_starts_orphan() {
        let (_remote_dir, url) = bare_remote();
        seed_remote(&url, "master", "seed.txt", b"seed");
        let dest = TempDir::new().unwrap();

        let options = CloneOptions {
            branch: "team-b".to_string(),
            ..Default::default()
        };
        let repo = GitRepo::clone(&url, &dest.path().join("store"), &options).unwrap();
        assert!(repo.head_commit().unwrap().is_none());
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("team-b"));
        assert!(!dest.path().join("store/seed.txt").exists());
    }

    #[test]
    fn test_clone_unreachable_remote() {
        let dest = TempDir::new().unwrap();
        let missing = dest.path().join("does-not-exist.git");
        let options = CloneOptions {
            branch: "master".to_string(),
            ..Default::default()
        };
        let result = GitRepo::clone(
            missing.to_str().unwrap(),
            &dest.path().join("store"),
            &options,
        );
        assert!(matches!(result, Err(GitError::CloneFailed { .. })));
    }
}
