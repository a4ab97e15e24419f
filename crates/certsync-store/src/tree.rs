//! Scratch working tree mirroring the remote store

use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempDir};
use tracing::debug;
use walkdir::WalkDir;

use certsync_core::InputError;

use crate::error::{Result, StoreError};

/// Revision marker kept by the bucket and local backends
pub const REVISION_FILE: &str = ".certsync-revision";

/// Writer lock held by the local backend while publishing
pub const LOCK_FILE: &str = ".certsync.lock";

/// Encryption state of a working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    /// Files are as stored remotely
    Encrypted,
    /// Files are decrypted and may be edited
    Plaintext,
    /// An encrypt or decrypt pass failed halfway; the tree must be discarded
    Inconsistent,
}

impl TreeState {
    /// Lowercase name for messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encrypted => "encrypted",
            Self::Plaintext => "plaintext",
            Self::Inconsistent => "inconsistent",
        }
    }
}

impl fmt::Display for TreeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file written into the working tree for publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Path relative to the store root
    pub path: PathBuf,
    /// Hex SHA-256 of the content when staged
    pub digest: String,
}

/// Local mirror of the remote store for the duration of one operation.
///
/// The backing temporary directory is removed when the tree is dropped.
pub struct WorkingTree {
    _scratch: TempDir,
    checkout_root: PathBuf,
    store_root: PathBuf,
    prefix: PathBuf,
    state: TreeState,
    baseline: BTreeSet<PathBuf>,
    revision: Option<u64>,
}

impl fmt::Debug for WorkingTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingTree")
            .field("store_root", &self.store_root)
            .field("state", &self.state)
            .field("baseline", &self.baseline.len())
            .field("revision", &self.revision)
            .finish()
    }
}

impl WorkingTree {
    /// Wrap a synced checkout. `prefix` selects the store directory inside it.
    pub(crate) fn new(scratch: TempDir, checkout_root: PathBuf, prefix: Option<&str>) -> Result<Self> {
        let prefix = match prefix {
            Some(p) if !p.trim_matches('/').is_empty() => normalize_relative(Path::new(p.trim_matches('/')))?,
            _ => PathBuf::new(),
        };
        let store_root = checkout_root.join(&prefix);
        std::fs::create_dir_all(&store_root).map_err(|e| StoreError::io_at(&store_root, e))?;

        let mut tree = Self {
            _scratch: scratch,
            checkout_root,
            store_root,
            prefix,
            state: TreeState::Encrypted,
            baseline: BTreeSet::new(),
            revision: None,
        };
        tree.refresh_baseline()?;
        Ok(tree)
    }

    /// Store root; all relative paths resolve against it
    pub fn root(&self) -> &Path {
        &self.store_root
    }

    /// Root of the whole checkout (repository workdir or bucket mirror)
    pub fn checkout_root(&self) -> &Path {
        &self.checkout_root
    }

    /// Store prefix inside the checkout
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Current encryption state
    pub fn state(&self) -> TreeState {
        self.state
    }

    /// Remote revision the tree was synced at, for revisioned backends
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// Absolute path of a store-relative path
    pub fn path_for(&self, relative: &Path) -> PathBuf {
        self.store_root.join(relative)
    }

    /// Path relative to the checkout root, as staged in the backend
    pub fn repo_relative(&self, relative: &Path) -> PathBuf {
        self.prefix.join(relative)
    }

    /// Whether a regular file exists at `relative`
    pub fn contains(&self, relative: &Path) -> bool {
        self.path_for(relative).is_file()
    }

    /// Whether `relative` existed when the tree was synced
    pub fn was_present(&self, relative: &Path) -> bool {
        self.baseline.contains(relative)
    }

    /// All store files, sorted, excluding backend metadata
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.store_root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
        {
            let entry = entry.map_err(|e| {
                StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.store_root) else {
                continue;
            };
            if !is_backend_metadata(relative) {
                files.push(relative.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read a store file
    pub fn read_file(&self, relative: &Path) -> Result<Vec<u8>> {
        let path = self.path_for(relative);
        std::fs::read(&path).map_err(|e| StoreError::io_at(&path, e))
    }

    /// Write `data` at `relative`, creating directories. The tree must be decrypted.
    pub fn write_file(&self, relative: &Path, data: &[u8]) -> Result<StagedFile> {
        self.require(TreeState::Plaintext)?;
        let relative = normalize_relative(relative)?;
        write_atomic(&self.path_for(&relative), data)?;
        debug!(path = %relative.display(), bytes = data.len(), "wrote store file");
        Ok(StagedFile {
            digest: sha256_hex(data),
            path: relative,
        })
    }

    /// Copy an external file into the tree at `relative`
    pub fn copy_into(&self, source: &Path, relative: &Path) -> Result<StagedFile> {
        let data = std::fs::read(source).map_err(|e| StoreError::io_at(source, e))?;
        self.write_file(relative, &data)
    }

    /// Stage a file already present in the tree without rewriting it
    pub fn stage_existing(&self, relative: &Path) -> Result<StagedFile> {
        let relative = normalize_relative(relative)?;
        let data = self.read_file(&relative)?;
        Ok(StagedFile {
            digest: sha256_hex(&data),
            path: relative,
        })
    }

    pub(crate) fn require(&self, expected: TreeState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StoreError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    pub(crate) fn set_state(&mut self, state: TreeState) {
        self.state = state;
    }

    pub(crate) fn set_revision(&mut self, revision: Option<u64>) {
        self.revision = revision;
    }

    /// Record the current file set as the sync-time baseline
    pub(crate) fn refresh_baseline(&mut self) -> Result<()> {
        self.baseline = self.files()?.into_iter().collect();
        Ok(())
    }
}

/// Backend bookkeeping files that are never encrypted or staged by callers
pub(crate) fn is_backend_metadata(relative: &Path) -> bool {
    let mut components = relative.components();
    match components.next() {
        Some(Component::Normal(first)) => {
            first == ".git"
                || (components.next().is_none() && (first == REVISION_FILE || first == LOCK_FILE))
        }
        _ => false,
    }
}

/// Normalise a store-relative path, rejecting absolute paths and `..` escapes
pub(crate) fn normalize_relative(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(escape_error(path));
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape_error(path)),
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(escape_error(path));
    }
    Ok(normalized)
}

fn escape_error(path: &Path) -> StoreError {
    InputError::InvalidValue {
        field: "path",
        value: path.display().to_string(),
        message: "must be a file path inside the store".to_string(),
    }
    .into()
}

/// Replace `path` with `data` via a sibling temp file and rename
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| StoreError::io_at(parent, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| StoreError::io_at(parent, e))?;
    temp.write_all(data).map_err(|e| StoreError::io_at(temp.path(), e))?;
    temp.as_file().sync_all().map_err(|e| StoreError::io_at(path, e))?;
    temp.persist(path).map_err(|e| StoreError::io_at(path, e.error))?;
    Ok(())
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
