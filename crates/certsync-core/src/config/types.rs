//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::{
    DEFAULT_BRANCH, DEFAULT_KEY_ENV, DEFAULT_MAX_PUBLISH_ATTEMPTS, DEFAULT_PASSPHRASE_ENV,
    DEFAULT_RETRY_BACKOFF_MS, DEFAULT_STORE_ID,
};

/// Main configuration for a credential store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend selection and its parameters
    pub storage: StorageConfig,

    /// Directory inside the backend that holds the store
    pub prefix: Option<String>,

    /// Refuse to publish anything
    pub readonly: bool,

    /// Don't write a README into new stores
    pub skip_docs: bool,

    /// Publish retry behaviour
    pub publish: PublishConfig,

    /// Encryption settings
    pub encryption: EncryptionConfig,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Git repository
    Git(GitStorageConfig),
    /// Cloud object storage bucket
    Bucket(BucketStorageConfig),
    /// Local or network-mounted directory
    Local(LocalStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Git(GitStorageConfig::default())
    }
}

impl StorageConfig {
    /// Mode name as written in configuration files
    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Git(_) => "git",
            Self::Bucket(_) => "bucket",
            Self::Local(_) => "local",
        }
    }
}

/// Git storage parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitStorageConfig {
    /// Repository URL
    pub url: String,

    /// Branch holding the credentials
    pub branch: String,

    /// Clone with depth 1
    pub shallow_clone: bool,

    /// Clone only the configured branch; fail if it doesn't exist remotely
    pub clone_branch_directly: bool,

    /// Commit author name
    pub git_full_name: Option<String>,

    /// Commit author email
    pub git_user_email: Option<String>,

    /// Base64 `user:token` sent as an HTTP basic authorization header
    pub basic_authorization: Option<String>,

    /// Token sent as an HTTP bearer authorization header
    pub bearer_authorization: Option<String>,

    /// SSH private key used for authentication
    pub private_key: Option<PathBuf>,
}

impl Default for GitStorageConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            shallow_clone: false,
            clone_branch_directly: false,
            git_full_name: None,
            git_user_email: None,
            basic_authorization: None,
            bearer_authorization: None,
            private_key: None,
        }
    }
}

/// Object storage provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketProvider {
    /// Google Cloud Storage
    #[default]
    Gcs,
    /// Amazon S3
    S3,
}

/// Bucket storage parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketStorageConfig {
    /// Provider
    pub provider: BucketProvider,

    /// Bucket name
    pub bucket: String,

    /// Object prefix within the bucket
    pub prefix: Option<String>,

    /// Google Cloud project id
    pub project_id: Option<String>,

    /// Google Cloud service account keys file
    pub keys_file: Option<PathBuf>,

    /// AWS region
    pub region: Option<String>,

    /// AWS access key id
    pub access_key_id: Option<String>,

    /// Name of the environment variable holding the AWS secret access key
    pub secret_access_key_env: Option<String>,
}

/// Local directory storage parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStorageConfig {
    /// Directory acting as the shared store
    pub path: PathBuf,
}

/// Publish retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Attempts before giving up with a conflict
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds
    pub retry_backoff_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_PUBLISH_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

/// How store contents are protected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Key derived from a shared passphrase
    #[default]
    Passphrase,
    /// Raw 256-bit key, base64 encoded
    Key,
    /// No encryption at all
    None,
}

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Encryption mode
    pub mode: EncryptionMode,

    /// Environment variable holding the passphrase
    pub passphrase_env: String,

    /// Environment variable holding the base64 key
    pub key_env: String,

    /// Store identifier mixed into the key derivation salt
    pub store_id: String,

    /// Key derivation parameters
    pub kdf: KdfConfig,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            mode: EncryptionMode::default(),
            passphrase_env: DEFAULT_PASSPHRASE_ENV.to_string(),
            key_env: DEFAULT_KEY_ENV.to_string(),
            store_id: DEFAULT_STORE_ID.to_string(),
            kdf: KdfConfig::default(),
        }
    }
}

impl EncryptionConfig {
    /// Read the passphrase from `passphrase_env`
    pub fn resolve_passphrase(&self) -> crate::error::Result<String> {
        read_secret(&self.passphrase_env)
    }

    /// Read the base64 key from `key_env`
    pub fn resolve_key(&self) -> crate::error::Result<String> {
        read_secret(&self.key_env)
    }
}

fn read_secret(var: &str) -> crate::error::Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(crate::error::ConfigError::MissingSecret(var.to_string())),
    }
}

/// Argon2id parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}
