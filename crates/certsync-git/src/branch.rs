//! Branch selection

use git2::build::CheckoutBuilder;
use git2::BranchType;
use tracing::{debug, info, warn};

use crate::repository::{GitRepo, Result};

impl GitRepo {
    /// Name of the branch HEAD points to, including unborn branches
    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = self.repo.find_reference("HEAD")?;
        let name = match head.symbolic_target() {
            Some(target) => target.strip_prefix("refs/heads/").map(str::to_string),
            None => None,
        };
        Ok(name)
    }

    /// Check out `branch`, tracking `<remote>/<branch>` when it exists.
    ///
    /// A branch that exists neither locally nor remotely becomes an orphan:
    /// HEAD points at the unborn branch and the index and working directory
    /// are emptied.
    pub(crate) fn checkout_store_branch(&self, remote: &str, branch: &str) -> Result<()> {
        let refname = format!("refs/heads/{}", branch);

        if self.repo.find_branch(branch, BranchType::Local).is_ok() {
            debug!(branch, "checking out existing local branch");
            self.repo.set_head(&refname)?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::new().force()))?;
            return Ok(());
        }

        let remote_branch = format!("{}/{}", remote, branch);
        if let Ok(tracking) = self.repo.find_branch(&remote_branch, BranchType::Remote) {
            let commit = tracking.get().peel_to_commit()?;
            let mut local = self.repo.branch(branch, &commit, false)?;
            local.set_upstream(Some(remote_branch.as_str()))?;
            self.repo.set_head(&refname)?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::new().force()))?;
            info!(branch, commit = %commit.id(), "checked out remote branch");
            return Ok(());
        }

        if self.head_commit()?.is_none() {
            debug!(branch, "remote is empty, pointing HEAD at unborn branch");
            self.repo.set_head(&refname)?;
            return Ok(());
        }

        warn!(branch, "branch not found on remote, starting an empty branch");
        self.repo.set_head(&refname)?;

        let mut index = self.repo.index()?;
        let tracked: Vec<_> = index
            .iter()
            .filter_map(|entry| String::from_utf8(entry.path).ok())
            .collect();
        index.clear()?;
        index.write()?;

        if let Some(workdir) = self.repo.workdir() {
            for path in tracked {
                let file = workdir.join(&path);
                if file.is_file() {
                    std::fs::remove_file(&file).map_err(|e| {
                        git2::Error::from_str(&format!("failed to remove {}: {}", file.display(), e))
                    })?;
                }
            }
        }

        Ok(())
    }
}
