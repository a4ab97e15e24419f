//! Git types

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Author/committer name used when nothing else is configured
pub const DEFAULT_AUTHOR_NAME: &str = "certsync";

/// Author/committer email used when nothing else is configured
pub const DEFAULT_AUTHOR_EMAIL: &str = "certsync@localhost";

/// Information about a git commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Commit hash (full)
    pub hash: String,
    /// Short hash (first 7 characters)
    pub short_hash: String,
    /// Commit message (first line)
    pub message: String,
    /// Full commit message body
    pub body: Option<String>,
    /// Author name
    pub author: String,
    /// Author email
    pub author_email: String,
    /// Commit timestamp
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    pub(crate) fn from_commit(commit: &git2::Commit<'_>) -> Self {
        let hash = commit.id().to_string();
        let short_hash = hash.chars().take(7).collect();
        let author = commit.author();

        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            hash,
            short_hash,
            message: commit.summary().unwrap_or("(no message)").to_string(),
            body: commit.body().map(|b| b.to_string()),
            author: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("unknown@example.com").to_string(),
            timestamp,
        }
    }

    /// Get the full message including body
    pub fn full_message(&self) -> String {
        match &self.body {
            Some(body) => format!("{}\n\n{}", self.message, body),
            None => self.message.clone(),
        }
    }
}

/// Who commits to the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    /// Author name, falls back to repository config
    pub name: Option<String>,
    /// Author email, falls back to repository config
    pub email: Option<String>,
}

impl CommitIdentity {
    /// Identity with an explicit name and email
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: Some(email.into()),
        }
    }

    /// Resolve into a signature, consulting the repository config for gaps
    pub(crate) fn signature(&self, repo: &git2::Repository) -> Result<git2::Signature<'static>, git2::Error> {
        let configured = repo.signature().ok();

        let name = self
            .name
            .clone()
            .or_else(|| configured.as_ref().and_then(|s| s.name().map(str::to_string)))
            .unwrap_or_else(|| DEFAULT_AUTHOR_NAME.to_string());
        let email = self
            .email
            .clone()
            .or_else(|| configured.as_ref().and_then(|s| s.email().map(str::to_string)))
            .unwrap_or_else(|| DEFAULT_AUTHOR_EMAIL.to_string());

        git2::Signature::now(&name, &email)
    }
}
