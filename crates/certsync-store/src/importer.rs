//! Importing a signing bundle into the store

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use certsync_core::{BundleKey, InputError};

use crate::committer::PublishedChangeSet;
use crate::docs::ensure_readme;
use crate::error::Result;
use crate::layout::{EntryKind, StoreEntry, StoreLayout};
use crate::store::CredentialStore;

/// Files and identity of a bundle to import
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Signing certificate (`.cer`)
    pub certificate: Option<PathBuf>,
    /// Private key exported as `.p12`
    pub private_key: Option<PathBuf>,
    /// Provisioning profile
    pub profile: Option<PathBuf>,
    /// `ios`, `tvos` or `macos`
    pub platform: String,
    /// Profile type, e.g. `appstore`
    pub environment: String,
    /// Bundle identifier
    pub app_identifier: String,
    /// Developer portal certificate id
    pub certificate_id: String,
}

impl ImportRequest {
    /// Input path for `kind`
    pub fn source(&self, kind: EntryKind) -> Option<&Path> {
        match kind {
            EntryKind::Certificate => self.certificate.as_deref(),
            EntryKind::PrivateKey => self.private_key.as_deref(),
            EntryKind::Profile => self.profile.as_deref(),
        }
    }

    /// Check that all three input files exist
    pub fn validate_inputs(&self) -> std::result::Result<(), InputError> {
        for kind in EntryKind::ALL {
            match self.source(kind) {
                Some(path) if path.is_file() => {}
                other => {
                    return Err(InputError::MissingInput {
                        kind: kind.display_name(),
                        path: other.map(Path::to_path_buf),
                    })
                }
            }
        }
        Ok(())
    }

    /// Validated bundle key
    pub fn bundle_key(&self) -> std::result::Result<BundleKey, InputError> {
        BundleKey::parse(
            &self.platform,
            &self.environment,
            &self.app_identifier,
            &self.certificate_id,
        )
    }
}

/// Result of a successful import
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    /// Bundle that was stored
    pub key: BundleKey,
    /// Store paths of the bundle files
    pub entries: Vec<StoreEntry>,
    /// Change set and backend reference
    pub published: PublishedChangeSet,
}

impl CredentialStore {
    /// Import a certificate, private key and profile as one change set.
    ///
    /// Inputs are validated before the backend is contacted. A re-import of the
    /// same app and environment replaces its profile and adds the new
    /// certificate pair next to the old one.
    #[instrument(skip_all, fields(
        backend = %self.backend().describe(),
        app = %request.app_identifier,
        environment = %request.environment,
    ))]
    pub async fn import(&self, request: ImportRequest) -> Result<ImportOutcome> {
        request.validate_inputs()?;
        let key = request.bundle_key()?;
        let start = Instant::now();

        let mut tree = self.backend().sync().await?;
        self.encryption.decrypt_files(&mut tree)?;

        let entries = StoreLayout::entries(&key);
        let mut staged = Vec::with_capacity(entries.len() + 1);
        for entry in &entries {
            let Some(source) = request.source(entry.kind) else {
                return Err(InputError::MissingInput {
                    kind: entry.kind.display_name(),
                    path: None,
                }
                .into());
            };
            debug!(kind = %entry.kind, path = %entry.path.display(), "copying into store");
            staged.push(tree.copy_into(source, &entry.path)?);
        }

        if !self.skip_docs {
            let backend = self.backend().describe();
            if let Some(readme) = ensure_readme(&tree, &backend, self.encryption.is_enabled())? {
                staged.push(readme);
            }
        }

        self.encryption.encrypt_files(&mut tree)?;

        let summary = format!(
            "[certsync] Import {} bundle for {} ({}, certificate {})",
            key.environment, key.app_identifier, key.platform, key.certificate_id
        );
        let published = self.committer.commit(&mut tree, &staged, &summary).await?;

        info!(
            bundle = %key,
            commit = %published.commit.id,
            duration_ms = start.elapsed().as_millis() as u64,
            "imported bundle"
        );
        Ok(ImportOutcome {
            key,
            entries,
            published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::ChangeStatus;
    use crate::docs::README_FILE;
    use crate::encryption::MAGIC;
    use crate::error::StoreError;
    use crate::storage::{LocalStorage, StorageBackend};
    use crate::testing::{fast_encryption, fast_policy, RecordingBackend};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Inputs {
        dir: TempDir,
    }

    impl Inputs {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("dist.cer"), b"certificate").unwrap();
            std::fs::write(dir.path().join("dist.p12"), b"private key").unwrap();
            std::fs::write(dir.path().join("app.mobileprovision"), b"profile v1").unwrap();
            Self { dir }
        }

        fn request(&self, certificate_id: &str) -> ImportRequest {
            ImportRequest {
                certificate: Some(self.dir.path().join("dist.cer")),
                private_key: Some(self.dir.path().join("dist.p12")),
                profile: Some(self.dir.path().join("app.mobileprovision")),
                platform: "ios".to_string(),
                environment: "appstore".to_string(),
                app_identifier: "com.example.app".to_string(),
                certificate_id: certificate_id.to_string(),
            }
        }
    }

    #[tokio::test]
    async fn test_missing_certificate_fails_before_sync() {
        let inputs = Inputs::new();
        let backend = Arc::new(RecordingBackend::default());
        let store = CredentialStore::new(backend.clone(), fast_encryption("pw"));

        let mut request = inputs.request("CERT1");
        request.certificate = Some(inputs.dir.path().join("nope.cer"));

        let err = store.import(request).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InputValidation(InputError::MissingInput { kind: "Certificate", path: Some(_) })
        ));
        assert_eq!(backend.syncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_absent_profile_named_in_error() {
        let inputs = Inputs::new();
        let backend = Arc::new(RecordingBackend::default());
        let store = CredentialStore::new(backend.clone(), fast_encryption("pw"));

        let mut request = inputs.request("CERT1");
        request.profile = None;

        let err = store.import(request).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Provisioning profile does not exist at path: <not provided>"
        );
        assert_eq!(backend.syncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_environment_fails_before_sync() {
        let inputs = Inputs::new();
        let backend = Arc::new(RecordingBackend::default());
        let store = CredentialStore::new(backend.clone(), fast_encryption("pw"));

        let mut request = inputs.request("CERT1");
        request.environment = "bogus".to_string();

        let err = store.import(request).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InputValidation(InputError::UnsupportedEnvironment(ref env)) if env == "bogus"
        ));
        assert_eq!(backend.syncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_readonly_store_never_publishes() {
        let inputs = Inputs::new();
        let backend = Arc::new(RecordingBackend::readonly());
        let store = CredentialStore::new(backend.clone(), fast_encryption("pw"));

        let err = store.import(inputs.request("CERT1")).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyViolation { .. }));
        assert_eq!(backend.publishes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_import_into_local_store() {
        let inputs = Inputs::new();
        let remote = TempDir::new().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(remote.path(), fast_policy()));
        let store = CredentialStore::new(backend.clone(), fast_encryption("pw"));

        let outcome = store.import(inputs.request("CERT1")).await.unwrap();
        assert_eq!(outcome.entries.len(), 3);
        assert_eq!(outcome.published.change_set.len(), 4);
        assert!(outcome.published.commit.changed);
        assert!(outcome
            .published
            .change_set
            .message()
            .starts_with("[certsync] Import appstore bundle for com.example.app (ios, certificate CERT1)"));

        let cert = remote.path().join("certs/Distribution/CERT1.cer");
        let on_disk = std::fs::read(&cert).unwrap();
        assert!(on_disk.starts_with(MAGIC));
        assert!(!on_disk.windows(11).any(|w| w == b"certificate"));

        let readme = std::fs::read_to_string(remote.path().join(README_FILE)).unwrap();
        assert!(readme.contains("ChaCha20-Poly1305"));

        let mut tree = backend.sync().await.unwrap();
        store.encryption().decrypt_files(&mut tree).unwrap();
        assert_eq!(
            tree.read_file(Path::new("profiles/appstore/AppStore_com.example.app.mobileprovision"))
                .unwrap(),
            b"profile v1"
        );
    }

    #[tokio::test]
    async fn test_reimport_replaces_profile_and_keeps_old_pair() {
        let inputs = Inputs::new();
        let remote = TempDir::new().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(remote.path(), fast_policy()));
        let store = CredentialStore::new(backend.clone(), fast_encryption("pw")).with_skip_docs(true);

        store.import(inputs.request("CERT1")).await.unwrap();
        std::fs::write(inputs.dir.path().join("app.mobileprovision"), b"profile v2").unwrap();
        let second = store.import(inputs.request("CERT2")).await.unwrap();

        let statuses: Vec<_> = second
            .published
            .change_set
            .entries()
            .iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![ChangeStatus::Added, ChangeStatus::Added, ChangeStatus::Updated]
        );
        assert!(!remote.path().join(README_FILE).exists());

        let mut tree = backend.sync().await.unwrap();
        store.encryption().decrypt_files(&mut tree).unwrap();
        assert!(tree.contains(Path::new("certs/Distribution/CERT1.p12")));
        assert!(tree.contains(Path::new("certs/Distribution/CERT2.p12")));
        assert_eq!(
            tree.read_file(Path::new("profiles/appstore/AppStore_com.example.app.mobileprovision"))
                .unwrap(),
            b"profile v2"
        );
    }
}
