//! Reading a bundle back out of the store

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use certsync_core::BundleKey;

use crate::error::{Result, StoreError};
use crate::layout::{EntryKind, StoreLayout};
use crate::store::CredentialStore;

/// Decrypted bundle files written to an output directory
#[derive(Debug, Clone)]
pub struct ExportedBundle {
    /// Bundle that was exported
    pub key: BundleKey,
    /// Written files in bundle order
    pub files: Vec<(EntryKind, PathBuf)>,
}

impl ExportedBundle {
    /// Output path of one bundle file
    pub fn path(&self, kind: EntryKind) -> Option<&Path> {
        self.files
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, path)| path.as_path())
    }
}

impl CredentialStore {
    /// Decrypt the bundle identified by `key` into `output_dir`.
    ///
    /// Files keep their store file names. Nothing is published.
    #[instrument(skip_all, fields(backend = %self.backend().describe(), bundle = %key))]
    pub async fn export(&self, key: &BundleKey, output_dir: &Path) -> Result<ExportedBundle> {
        let mut tree = self.backend().sync().await?;
        self.encryption.decrypt_files(&mut tree)?;

        let mut contents = Vec::with_capacity(EntryKind::ALL.len());
        for entry in StoreLayout::entries(key) {
            if !tree.contains(&entry.path) {
                return Err(StoreError::MissingFile(entry.path));
            }
            contents.push((entry.kind, entry.path.clone(), tree.read_file(&entry.path)?));
        }

        std::fs::create_dir_all(output_dir).map_err(|e| StoreError::io_at(output_dir, e))?;

        let mut files = Vec::with_capacity(contents.len());
        for (kind, relative, data) in contents {
            let Some(name) = relative.file_name() else {
                return Err(StoreError::MissingFile(relative));
            };
            let target = output_dir.join(name);
            std::fs::write(&target, &data).map_err(|e| StoreError::io_at(&target, e))?;
            debug!(kind = %kind, path = %target.display(), "exported store file");
            files.push((kind, target));
        }

        info!(output = %output_dir.display(), files = files.len(), "exported bundle");
        Ok(ExportedBundle {
            key: key.clone(),
            files,
        })
    }
}
