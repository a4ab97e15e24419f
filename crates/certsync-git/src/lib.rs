//! certsync git - git operations for the credential store
//!
//! This crate wraps `git2` with the handful of operations a git-backed
//! credential store needs: cloning a branch into a scratch directory,
//! committing an explicit set of paths, pushing with rejection detection,
//! and rebasing onto a remote head that moved underneath us.

mod auth;
mod branch;
mod commits;
mod remote;
mod repository;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::GitCredentials;
pub use remote::{PushOutcome, DEFAULT_REMOTE};
pub use repository::{CloneOptions, GitRepo, Result};
pub use types::{CommitIdentity, CommitInfo};
