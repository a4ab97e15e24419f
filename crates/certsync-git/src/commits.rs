//! Commit operations

use std::path::PathBuf;

use git2::{Oid, Sort};
use tracing::{debug, info, instrument};

use crate::repository::{GitRepo, Result};
use crate::types::{CommitIdentity, CommitInfo};

impl GitRepo {
    /// Stage exactly `paths` (relative to the workdir) and commit them on HEAD.
    ///
    /// Returns `None` when the resulting tree is identical to HEAD's, in which
    /// case nothing is committed.
    #[instrument(skip(self, paths, message, identity), fields(paths = paths.len()))]
    pub fn commit_paths(
        &self,
        paths: &[PathBuf],
        message: &str,
        identity: &CommitIdentity,
    ) -> Result<Option<Oid>> {
        let mut index = self.repo.index()?;
        let workdir = self.repo.workdir().map(|w| w.to_path_buf());

        for path in paths {
            let present = workdir.as_ref().is_some_and(|w| w.join(path).is_file());
            if present {
                index.add_path(path)?;
            } else {
                index.remove_path(path)?;
            }
        }
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = self.head_commit()?;

        if let Some(parent) = &parent {
            if parent.tree_id() == tree_id {
                debug!("tree unchanged, skipping commit");
                return Ok(None);
            }
        }

        let tree = self.repo.find_tree(tree_id)?;
        let signature = identity.signature(&self.repo)?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

        info!(commit = %oid, "created commit");
        Ok(Some(oid))
    }

    /// Get the most recent N commits on HEAD
    pub fn recent_commits(&self, count: usize) -> Result<Vec<CommitInfo>> {
        let Some(head) = self.head_commit()? else {
            return Ok(Vec::new());
        };

        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push(head.id())?;

        let mut commits = Vec::new();
        for oid in revwalk.take(count) {
            let commit = self.repo.find_commit(oid?)?;
            commits.push(CommitInfo::from_commit(&commit));
        }

        Ok(commits)
    }
}
