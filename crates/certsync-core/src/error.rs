//! Error types shared across certsync crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Environment variable holding a secret is not set
    #[error("Environment variable {0} is not set")]
    MissingSecret(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Shorthand for an [`ConfigError::InvalidValue`]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while validating caller input, before any remote work
#[derive(Debug, Error)]
pub enum InputError {
    /// One of the bundle input files is absent or does not exist
    #[error("{kind} does not exist at path: {}", display_input(.path))]
    MissingInput {
        kind: &'static str,
        path: Option<PathBuf>,
    },

    /// A required value was not provided
    #[error("Missing required value: {0}")]
    MissingValue(&'static str),

    /// Environment string is not one of the supported profile types
    #[error("Unsupported environment '{0}', must be one of: development, adhoc, appstore, enterprise, developer_id")]
    UnsupportedEnvironment(String),

    /// Platform string is not supported
    #[error("Unsupported platform '{0}', must be one of: ios, tvos, macos")]
    UnsupportedPlatform(String),

    /// A value failed validation
    #[error("Invalid {field} '{value}': {message}")]
    InvalidValue {
        field: &'static str,
        value: String,
        message: String,
    },
}

fn display_input(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<not provided>".to_string())
}

/// Git-related errors
#[derive(Debug, Error)]
pub enum GitError {
    /// Repository not found
    #[error("Git repository not found at {0}")]
    RepositoryNotFound(PathBuf),

    /// Failed to open repository
    #[error("Failed to open repository: {0}")]
    OpenFailed(String),

    /// Branch missing on the remote
    #[error("Branch '{branch}' not found in {url}")]
    BranchNotFound { branch: String, url: String },

    /// Failed to clone
    #[error("Failed to clone {url}: {reason}")]
    CloneFailed { url: String, reason: String },

    /// Failed to fetch
    #[error("Failed to fetch from {remote}: {reason}")]
    FetchFailed { remote: String, reason: String },

    /// Failed to push
    #[error("Failed to push to remote: {0}")]
    PushFailed(String),

    /// Remote not found
    #[error("Remote not found: {0}")]
    RemoteNotFound(String),

    /// Git2 library error
    #[error("Git error: {0}")]
    Git2(#[from] git2::Error),
}

impl GitError {
    /// Whether this error came from talking to the remote (network, auth, transport)
    pub fn is_remote_failure(&self) -> bool {
        match self {
            Self::CloneFailed { .. } | Self::FetchFailed { .. } | Self::PushFailed(_) => true,
            Self::Git2(e) => matches!(
                e.class(),
                git2::ErrorClass::Net
                    | git2::ErrorClass::Ssh
                    | git2::ErrorClass::Http
                    | git2::ErrorClass::Ssl
            ) || matches!(
                e.code(),
                git2::ErrorCode::Auth | git2::ErrorCode::Certificate
            ),
            _ => false,
        }
    }
}
