//! certsync store - encrypted shared credential store
//!
//! Imports a certificate, its private key and a provisioning profile into a
//! shared store, encrypted at rest and published through a pluggable storage
//! backend (git repository, cloud bucket or a local directory).
//!
//! An import runs as one sequential pipeline:
//! sync the store into a scratch [`WorkingTree`], decrypt it, copy the bundle
//! to its [`StoreLayout`] paths, encrypt it again and publish the
//! [`ChangeSet`] through the [`Committer`].

pub mod committer;
pub mod docs;
pub mod encryption;
pub mod error;
pub mod exporter;
pub mod importer;
pub mod layout;
pub mod storage;
pub mod store;
pub mod tree;

#[cfg(test)]
pub(crate) mod testing;

pub use committer::{ChangeEntry, ChangeSet, ChangeStatus, Committer, OnConflict, PublishedChangeSet};
pub use encryption::{Encryption, EncryptionKey, KdfParams};
pub use error::{Result, StoreError};
pub use exporter::ExportedBundle;
pub use importer::{ImportOutcome, ImportRequest};
pub use layout::{resolve_path, EntryKind, StoreEntry, StoreLayout};
pub use storage::{
    for_config, BucketStorage, CommitRef, GitStorage, LocalStorage, PublishPolicy,
    StorageBackend,
};
pub use store::CredentialStore;
pub use tree::{StagedFile, TreeState, WorkingTree};
