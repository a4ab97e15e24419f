//! Turning staged files into one published change set

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use certsync_core::InputError;

use crate::error::{Result, StoreError};
use crate::storage::{CommitRef, StorageBackend};
use crate::tree::{normalize_relative, StagedFile, WorkingTree};

/// Whether a change-set path is new to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeStatus {
    /// Not present at sync time
    Added,
    /// Replaces a file present at sync time
    Updated,
}

/// One path in a change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Path relative to the store root
    pub path: PathBuf,
    /// Added or updated
    pub status: ChangeStatus,
}

/// What a backend does when the remote moved on since the tree was synced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnConflict {
    /// Re-apply the change-set files on top of the new remote state
    #[default]
    Rebase,
    /// Stop with [`StoreError::PublishConflict`]; the caller rebuilds the change set
    Fail,
}

/// Ordered, de-duplicated paths published together with one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    entries: Vec<ChangeEntry>,
    message: String,
    #[serde(default)]
    on_conflict: OnConflict,
}

impl ChangeSet {
    /// Entries in staging order
    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    /// Paths in staging order
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|e| e.path.as_path())
    }

    /// Audit message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Conflict handling requested by the publisher
    pub fn on_conflict(&self) -> OnConflict {
        self.on_conflict
    }

    /// Same change set with a different conflict policy
    pub fn with_on_conflict(mut self, on_conflict: OnConflict) -> Self {
        self.on_conflict = on_conflict;
        self
    }

    /// Number of paths
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there is nothing to publish
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A change set together with where it landed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedChangeSet {
    /// What was published
    pub change_set: ChangeSet,
    /// Backend reference of the publish
    pub commit: CommitRef,
    /// When the backend accepted the change set
    pub published_at: DateTime<Utc>,
}

impl PublishedChangeSet {
    /// Audit record as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Validates staged files and publishes them through a backend
#[derive(Clone)]
pub struct Committer {
    backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for Committer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Committer")
            .field("backend", &self.backend.describe())
            .finish()
    }
}

impl Committer {
    /// Committer publishing through `backend`
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Backend this committer publishes to
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Validate `files` against the tree and build the change set
    pub fn prepare(tree: &WorkingTree, files: &[StagedFile], summary: &str) -> Result<ChangeSet> {
        if files.is_empty() {
            return Err(InputError::MissingValue("staged files").into());
        }

        let mut digests: HashMap<PathBuf, &str> = HashMap::new();
        let mut entries = Vec::new();

        for file in files {
            let path = normalize_relative(&file.path)?;

            if let Some(seen) = digests.get(&path) {
                if *seen != file.digest {
                    return Err(StoreError::PathCollision(path));
                }
                continue;
            }

            if !tree.contains(&path) {
                return Err(StoreError::MissingFile(path));
            }

            let status = if tree.was_present(&path) {
                ChangeStatus::Updated
            } else {
                ChangeStatus::Added
            };
            digests.insert(path.clone(), file.digest.as_str());
            entries.push(ChangeEntry { path, status });
        }

        let message = audit_message(summary, &entries);
        Ok(ChangeSet {
            entries,
            message,
            on_conflict: OnConflict::Rebase,
        })
    }

    /// Publish `files` as one change set, rebasing onto concurrent updates.
    ///
    /// A read-only backend is rejected before the files are even inspected.
    pub async fn commit(
        &self,
        tree: &mut WorkingTree,
        files: &[StagedFile],
        summary: &str,
    ) -> Result<PublishedChangeSet> {
        self.commit_with(tree, files, summary, OnConflict::Rebase).await
    }

    /// Publish `files` as one change set with an explicit conflict policy
    #[instrument(skip_all, fields(backend = %self.backend.describe(), files = files.len(), ?on_conflict))]
    pub async fn commit_with(
        &self,
        tree: &mut WorkingTree,
        files: &[StagedFile],
        summary: &str,
        on_conflict: OnConflict,
    ) -> Result<PublishedChangeSet> {
        if self.backend.is_readonly() {
            return Err(StoreError::ReadOnlyViolation {
                backend: self.backend.describe(),
            });
        }

        let change_set = Self::prepare(tree, files, summary)?.with_on_conflict(on_conflict);
        let commit = self.backend.publish(tree, &change_set).await?;

        info!(
            commit = %commit.id,
            changed = commit.changed,
            attempts = commit.attempts,
            paths = change_set.len(),
            "published change set"
        );
        Ok(PublishedChangeSet {
            change_set,
            commit,
            published_at: Utc::now(),
        })
    }
}

fn audit_message(summary: &str, entries: &[ChangeEntry]) -> String {
    let mut message = summary.trim().to_string();

    for (heading, status) in [("Added", ChangeStatus::Added), ("Updated", ChangeStatus::Updated)] {
        let paths: Vec<String> = entries
            .iter()
            .filter(|e| e.status == status)
            .map(|e| slash_path(&e.path))
            .collect();
        if paths.is_empty() {
            continue;
        }
        message.push_str("\n\n");
        message.push_str(heading);
        message.push(':');
        for path in paths {
            message.push_str("\n  ");
            message.push_str(&path);
        }
    }

    message.push('\n');
    message
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{plaintext_tree, RecordingBackend};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_prepare_classifies_against_baseline() {
        let mut tree = plaintext_tree();
        let existing = tree.write_file(Path::new("profiles/development/P.mobileprovision"), b"old").unwrap();
        tree.refresh_baseline().unwrap();

        let updated = tree.write_file(&existing.path, b"new").unwrap();
        let added = tree.write_file(Path::new("certs/Development/A.cer"), b"cert").unwrap();

        let change_set = Committer::prepare(&tree, &[added, updated], "Import bundle").unwrap();
        assert_eq!(change_set.len(), 2);
        assert_eq!(change_set.entries()[0].status, ChangeStatus::Added);
        assert_eq!(change_set.entries()[1].status, ChangeStatus::Updated);
        assert_eq!(
            change_set.message(),
            "Import bundle\n\nAdded:\n  certs/Development/A.cer\n\nUpdated:\n  profiles/development/P.mobileprovision\n"
        );
    }

    #[test]
    fn test_identical_duplicates_collapse() {
        let tree = plaintext_tree();
        let a = tree.write_file(Path::new("certs/a.cer"), b"a").unwrap();
        let dup = StagedFile {
            path: PathBuf::from("./certs/a.cer"),
            digest: a.digest.clone(),
        };

        let change_set = Committer::prepare(&tree, &[a, dup], "x").unwrap();
        assert_eq!(change_set.len(), 1);
    }

    #[test]
    fn test_conflicting_duplicates_rejected() {
        let tree = plaintext_tree();
        let a = tree.write_file(Path::new("certs/a.cer"), b"a").unwrap();
        let other = StagedFile {
            path: PathBuf::from("certs/x/../a.cer"),
            digest: "0".repeat(64),
        };

        let err = Committer::prepare(&tree, &[a, other], "x").unwrap_err();
        assert!(matches!(err, StoreError::PathCollision(ref p) if p == Path::new("certs/a.cer")));
    }

    #[test]
    fn test_missing_file_rejected() {
        let tree = plaintext_tree();
        let ghost = StagedFile {
            path: PathBuf::from("certs/ghost.cer"),
            digest: String::new(),
        };
        let err = Committer::prepare(&tree, &[ghost], "x").unwrap_err();
        assert!(matches!(err, StoreError::MissingFile(_)));
    }

    #[test]
    fn test_escaping_path_rejected() {
        let tree = plaintext_tree();
        let escape = StagedFile {
            path: PathBuf::from("../outside.cer"),
            digest: String::new(),
        };
        let err = Committer::prepare(&tree, &[escape], "x").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InputValidation(InputError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_readonly_rejected_before_publish() {
        let backend = Arc::new(RecordingBackend::readonly());
        let committer = Committer::new(backend.clone());

        let mut tree = plaintext_tree();
        let staged = tree.write_file(Path::new("certs/a.cer"), b"a").unwrap();

        let err = committer.commit(&mut tree, &[staged], "x").await.unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyViolation { .. }));
        assert_eq!(backend.publishes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_commit_publishes_change_set() {
        let backend = Arc::new(RecordingBackend::default());
        let committer = Committer::new(backend.clone());

        let mut tree = plaintext_tree();
        let staged = tree.write_file(Path::new("certs/a.cer"), b"a").unwrap();
        crate::Encryption::disabled().encrypt_files(&mut tree).unwrap();

        let published = committer.commit(&mut tree, &[staged], "Add a").await.unwrap();
        assert_eq!(backend.publishes.load(Ordering::SeqCst), 1);
        assert!(published.commit.changed);
        assert_eq!(
            published.change_set.paths().collect::<Vec<_>>(),
            vec![Path::new("certs/a.cer")]
        );

        let json: serde_json::Value = serde_json::from_str(&published.to_json().unwrap()).unwrap();
        assert_eq!(json["commit"]["id"], "recorded-1");
        assert_eq!(json["change_set"]["entries"][0]["status"], "Added");
        assert_eq!(json["change_set"]["on_conflict"], "Rebase");
        assert!(json["published_at"].is_string());
    }
}
