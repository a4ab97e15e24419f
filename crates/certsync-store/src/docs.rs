//! Plaintext README placed at the store root

use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::layout::{CERTS_DIR, PROFILES_DIR};
use crate::tree::{StagedFile, WorkingTree};

/// File name of the generated README
pub const README_FILE: &str = "README.md";

/// README text describing the store layout
pub fn readme_contents(backend: &str, encrypted: bool) -> String {
    let protection = if encrypted {
        "Every file except this README is encrypted with ChaCha20-Poly1305. \
         Use certsync with the team passphrase or key to read it; files cannot \
         be opened directly."
    } else {
        "Encryption is disabled for this store. Treat it with the same care as \
         the private keys it contains."
    };

    format!(
        "# Code signing credentials\n\
         \n\
         This store is managed by certsync ({backend}). Do not edit it by hand.\n\
         \n\
         {protection}\n\
         \n\
         ## Layout\n\
         \n\
         - `{certs}/<class>/<certificate id>.cer`: signing certificate\n\
         - `{certs}/<class>/<certificate id>.p12`: matching private key\n\
         - `{profiles}/<environment>/<Label>_<app id>.mobileprovision`: iOS provisioning profile\n\
         - `{profiles}/<environment>/<Label>_<app id>_tvos.mobileprovision`: tvOS provisioning profile\n\
         - `{profiles}/<environment>/<Label>_<app id>.provisionprofile`: macOS provisioning profile\n\
         \n\
         `<class>` is one of Development, Distribution, Enterprise, DeveloperIDApplication.\n",
        backend = backend,
        protection = protection,
        certs = CERTS_DIR,
        profiles = PROFILES_DIR,
    )
}

/// Write the README when the store doesn't have one yet
pub fn ensure_readme(tree: &WorkingTree, backend: &str, encrypted: bool) -> Result<Option<StagedFile>> {
    let path = Path::new(README_FILE);
    if tree.contains(path) {
        debug!("store README already present");
        return Ok(None);
    }
    let staged = tree.write_file(path, readme_contents(backend, encrypted).as_bytes())?;
    Ok(Some(staged))
}
