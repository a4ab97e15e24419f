//! Cloud bucket backend driven through the provider CLIs
//!
//! Google Cloud Storage goes through `gcloud storage`, S3 through `aws s3`.
//! Object puts are atomic individually but not as a group, so concurrent
//! writers are detected with a revision object: publish re-reads it and
//! treats a changed value as a stale base.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use certsync_core::config::{BucketProvider, BucketStorageConfig};
use certsync_core::ConfigError;

use super::{ChangeSetSnapshot, CommitRef, PublishPolicy, StorageBackend};
use crate::committer::{ChangeSet, OnConflict};
use crate::error::{Result, StoreError};
use crate::tree::{TreeState, WorkingTree, REVISION_FILE};

/// Store kept in a GCS or S3 bucket
#[derive(Debug, Clone)]
pub struct BucketStorage {
    provider: BucketProvider,
    bucket: String,
    object_prefix: Option<String>,
    project_id: Option<String>,
    keys_file: Option<PathBuf>,
    region: Option<String>,
    access_key_id: Option<String>,
    secret_access_key_env: Option<String>,
    prefix: Option<String>,
    cli: Option<PathBuf>,
    policy: PublishPolicy,
}

impl BucketStorage {
    /// Backend from bucket storage configuration
    pub fn from_config(
        config: &BucketStorageConfig,
        prefix: Option<String>,
        policy: PublishPolicy,
    ) -> Result<Self> {
        validate_bucket_name(&config.bucket)?;

        match config.provider {
            BucketProvider::Gcs => {
                if let Some(keys) = &config.keys_file {
                    if !keys.is_file() {
                        return Err(ConfigError::invalid(
                            "storage.keys_file",
                            format!("{} does not exist", keys.display()),
                        )
                        .into());
                    }
                }
            }
            BucketProvider::S3 => {
                if config.access_key_id.is_some() && config.secret_access_key_env.is_none() {
                    return Err(ConfigError::invalid(
                        "storage.secret_access_key_env",
                        "required when access_key_id is set",
                    )
                    .into());
                }
            }
        }

        Ok(Self {
            provider: config.provider,
            bucket: config.bucket.clone(),
            object_prefix: config
                .prefix
                .as_deref()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            project_id: config.project_id.clone(),
            keys_file: config.keys_file.clone(),
            region: config.region.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key_env: config.secret_access_key_env.clone(),
            prefix,
            cli: None,
            policy,
        })
    }

    /// Run this executable instead of `gcloud`/`aws` from `PATH`
    pub fn with_cli(mut self, cli: impl Into<PathBuf>) -> Self {
        self.cli = Some(cli.into());
        self
    }

    fn program(&self) -> PathBuf {
        self.cli.clone().unwrap_or_else(|| {
            PathBuf::from(match self.provider {
                BucketProvider::Gcs => "gcloud",
                BucketProvider::S3 => "aws",
            })
        })
    }

    fn scheme(&self) -> &'static str {
        match self.provider {
            BucketProvider::Gcs => "gs",
            BucketProvider::S3 => "s3",
        }
    }

    fn subcommand(&self) -> [&'static str; 1] {
        match self.provider {
            BucketProvider::Gcs => ["storage"],
            BucketProvider::S3 => ["s3"],
        }
    }

    /// URL of the store root, or of `relative` below it
    fn object_url(&self, relative: Option<&str>) -> String {
        let mut url = format!("{}://{}", self.scheme(), self.bucket);
        if let Some(prefix) = &self.object_prefix {
            url.push('/');
            url.push_str(prefix);
        }
        if let Some(relative) = relative {
            url.push('/');
            url.push_str(relative.trim_start_matches('/'));
        }
        url
    }

    fn sync_args(&self, dest: &Path) -> Vec<String> {
        let mut args: Vec<String> = self.subcommand().iter().map(|s| s.to_string()).collect();
        match self.provider {
            BucketProvider::Gcs => args.extend([
                "rsync".to_string(),
                self.object_url(None),
                dest.display().to_string(),
                "--recursive".to_string(),
            ]),
            BucketProvider::S3 => args.extend([
                "sync".to_string(),
                self.object_url(None),
                dest.display().to_string(),
                "--only-show-errors".to_string(),
            ]),
        }
        args
    }

    fn download_args(&self, relative: &str) -> Vec<String> {
        let mut args: Vec<String> = self.subcommand().iter().map(|s| s.to_string()).collect();
        match self.provider {
            BucketProvider::Gcs => args.extend(["cat".to_string(), self.object_url(Some(relative))]),
            BucketProvider::S3 => args.extend([
                "cp".to_string(),
                self.object_url(Some(relative)),
                "-".to_string(),
            ]),
        }
        args
    }

    fn upload_args(&self, local: &Path, relative: &str) -> Vec<String> {
        let mut args: Vec<String> = self.subcommand().iter().map(|s| s.to_string()).collect();
        args.extend([
            "cp".to_string(),
            local.display().to_string(),
            self.object_url(Some(relative)),
        ]);
        if self.provider == BucketProvider::S3 {
            args.push("--only-show-errors".to_string());
        }
        args
    }

    /// Environment for the CLI; the S3 secret is read from its variable here
    fn command_env(&self) -> Result<Vec<(&'static str, String)>> {
        let mut env = Vec::new();
        match self.provider {
            BucketProvider::Gcs => {
                if let Some(project) = &self.project_id {
                    env.push(("CLOUDSDK_CORE_PROJECT", project.clone()));
                }
                if let Some(keys) = &self.keys_file {
                    env.push(("CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE", keys.display().to_string()));
                }
            }
            BucketProvider::S3 => {
                if let Some(region) = &self.region {
                    env.push(("AWS_DEFAULT_REGION", region.clone()));
                }
                if let Some(key_id) = &self.access_key_id {
                    env.push(("AWS_ACCESS_KEY_ID", key_id.clone()));
                }
                if let Some(var) = &self.secret_access_key_env {
                    let secret = std::env::var(var).map_err(|_| ConfigError::MissingSecret(var.clone()))?;
                    env.push(("AWS_SECRET_ACCESS_KEY", secret));
                }
            }
        }
        Ok(env)
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>> {
        let program = self.program();
        let start = std::time::Instant::now();
        let output = Command::new(&program)
            .args(args)
            .envs(self.command_env()?)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StoreError::remote(
                        self.describe(),
                        "run",
                        format!("{} is not installed", program.display()),
                    )
                } else {
                    StoreError::Io(e)
                }
            })?;

        debug!(
            program = %program.display(),
            args = ?args,
            success = output.status.success(),
            duration_ms = start.elapsed().as_millis() as u64,
            "bucket CLI"
        );

        if !output.status.success() {
            return Err(StoreError::Command {
                command: format!("{} {}", program.display(), args.join(" ")),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn unavailable(&self, operation: &'static str, err: StoreError) -> StoreError {
        match err {
            StoreError::Command { command, stderr, .. } => {
                StoreError::remote(self.describe(), operation, format!("{}: {}", command, stderr))
            }
            other => other,
        }
    }

    async fn read_revision(&self, operation: &'static str) -> Result<u64> {
        match self.run(&self.download_args(REVISION_FILE)).await {
            Ok(stdout) => String::from_utf8_lossy(&stdout).trim().parse().map_err(|_| {
                StoreError::remote(self.describe(), operation, "revision object is not a number")
            }),
            Err(StoreError::Command { stderr, .. }) if is_not_found(&stderr) => Ok(0),
            Err(e) => Err(self.unavailable(operation, e)),
        }
    }

    async fn download(&self, dest: &Path) -> Result<u64> {
        std::fs::create_dir_all(dest).map_err(|e| StoreError::io_at(dest, e))?;
        let revision = self.read_revision("sync").await?;
        self.run(&self.sync_args(dest))
            .await
            .map_err(|e| self.unavailable("sync", e))?;

        // The revision object is tracked separately from the tree
        let _ = std::fs::remove_file(dest.join(REVISION_FILE));
        Ok(revision)
    }

    async fn upload(&self, local: &Path, relative: &str) -> Result<()> {
        self.run(&self.upload_args(local, relative))
            .await
            .map_err(|e| self.unavailable("publish", e))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for BucketStorage {
    fn describe(&self) -> String {
        format!("bucket:{}", self.object_url(None))
    }

    fn is_readonly(&self) -> bool {
        self.policy.readonly
    }

    #[instrument(skip(self), fields(backend = %self.describe()))]
    async fn sync(&self) -> Result<WorkingTree> {
        let start = std::time::Instant::now();
        let scratch = TempDir::new()?;
        let checkout = scratch.path().join("store");

        let revision = self.download(&checkout).await?;
        let mut tree = WorkingTree::new(scratch, checkout, self.prefix.as_deref())?;
        tree.set_revision(Some(revision));

        info!(revision, duration_ms = start.elapsed().as_millis() as u64, "synced bucket store");
        Ok(tree)
    }

    #[instrument(skip_all, fields(backend = %self.describe(), paths = change_set.len()))]
    async fn publish(&self, tree: &mut WorkingTree, change_set: &ChangeSet) -> Result<CommitRef> {
        self.policy.ensure_writable(&self.describe())?;
        tree.require(TreeState::Encrypted)?;

        let snapshot = ChangeSetSnapshot::capture(tree, change_set)?;
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            let current = self.read_revision("publish").await?;

            if Some(current) == tree.revision() {
                for (path, _) in snapshot.files() {
                    let object = object_key(&tree.repo_relative(path));
                    self.upload(&tree.path_for(path), &object).await?;
                }

                let next = current + 1;
                let marker = tempfile::NamedTempFile::new()?;
                std::fs::write(marker.path(), next.to_string())
                    .map_err(|e| StoreError::io_at(marker.path(), e))?;
                self.upload(marker.path(), REVISION_FILE).await?;

                tree.set_revision(Some(next));
                info!(revision = next, attempt, "published to bucket store");
                return Ok(CommitRef {
                    id: next.to_string(),
                    changed: true,
                    attempts: attempt,
                });
            }

            warn!(attempt, max_attempts, current, synced = ?tree.revision(), "bucket store moved during publish");
            if change_set.on_conflict() == OnConflict::Fail {
                return Err(StoreError::PublishConflict {
                    backend: self.describe(),
                    attempts: attempt,
                });
            }
            if attempt == max_attempts {
                break;
            }
            self.policy.backoff().await;

            let revision = self.download(tree.checkout_root()).await?;
            snapshot.restore(tree)?;
            tree.set_revision(Some(revision));
        }

        Err(StoreError::PublishConflict {
            backend: self.describe(),
            attempts: max_attempts,
        })
    }
}

/// `/`-separated object key
fn object_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    ["no urls matched", "nosuchkey", "not found", "404", "does not exist"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

fn validate_bucket_name(bucket: &str) -> Result<()> {
    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    let valid_edges = bucket
        .chars()
        .next()
        .zip(bucket.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if (3..=63).contains(&bucket.len()) && valid_chars && valid_edges {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "storage.bucket",
            format!(
                "'{}' is not a valid bucket name (3-63 lowercase letters, digits, '-', '_' or '.')",
                bucket
            ),
        )
        .into())
    }
}
