//! Error types for store operations

use std::path::{Path, PathBuf};

use certsync_core::error::{ConfigError, GitError, InputError};
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store-related errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Caller input was rejected before any remote or disk work
    #[error(transparent)]
    InputValidation(#[from] InputError),

    /// The backend could not be reached or refused our credentials
    #[error("{backend}: {operation} failed: {reason}")]
    RemoteUnavailable {
        backend: String,
        operation: &'static str,
        reason: String,
    },

    /// Configured branch does not exist and may not be created
    #[error("Branch '{branch}' does not exist in {url}")]
    BranchNotFound { branch: String, url: String },

    /// Ciphertext could not be authenticated or decoded
    #[error("Failed to decrypt {path}: {reason}")]
    DecryptionFailed { path: PathBuf, reason: String },

    /// Plaintext could not be sealed
    #[error("Failed to encrypt {path}: {reason}")]
    EncryptionFailed { path: PathBuf, reason: String },

    /// Master key could not be derived
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Remote kept moving underneath us
    #[error("{backend}: publish gave up after {attempts} attempts, the remote kept changing")]
    PublishConflict { backend: String, attempts: u32 },

    /// Store is configured read-only
    #[error("{backend} is read-only, refusing to publish")]
    ReadOnlyViolation { backend: String },

    /// A staged file is not present in the working tree
    #[error("File not found in working tree: {0}")]
    MissingFile(PathBuf),

    /// Two staged files map to the same path with different content
    #[error("Conflicting content staged for {0}")]
    PathCollision(PathBuf),

    /// Working tree is in the wrong encryption state for the operation
    #[error("Working tree is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// External command failed
    #[error("Command failed: {command} (exit code {status}): {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Git error
    #[error(transparent)]
    Git(#[from] GitError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Wrap an IO error with the path it happened on
    pub fn io_at(path: &Path, err: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.display(), err),
        ))
    }

    /// Whether retrying the whole operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable { .. } | Self::PublishConflict { .. }
        )
    }

    pub(crate) fn remote(backend: impl Into<String>, operation: &'static str, reason: impl ToString) -> Self {
        Self::RemoteUnavailable {
            backend: backend.into(),
            operation,
            reason: reason.to_string(),
        }
    }
}
