//! Where bundles live inside the store

use std::fmt;
use std::path::PathBuf;

use certsync_core::{BundleKey, CertificateClass, Environment, Platform};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level directory for certificates and private keys
pub const CERTS_DIR: &str = "certs";

/// Top-level directory for provisioning profiles
pub const PROFILES_DIR: &str = "profiles";

/// Kind of file stored for a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Public certificate (`.cer`)
    Certificate,
    /// Private key (`.p12`)
    PrivateKey,
    /// Provisioning profile
    Profile,
}

impl EntryKind {
    /// All entry kinds in bundle order
    pub const ALL: [EntryKind; 3] = [Self::Certificate, Self::PrivateKey, Self::Profile];

    /// Name used in messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Certificate => "Certificate",
            Self::PrivateKey => "Private key",
            Self::Profile => "Provisioning profile",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One file of a bundle and its path relative to the store root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    /// What the file is
    pub kind: EntryKind,
    /// Path relative to the store root
    pub path: PathBuf,
}

/// Maps bundle keys to store-relative paths
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreLayout;

impl StoreLayout {
    /// Directory holding certificates of `class`
    pub fn certificate_dir(class: CertificateClass) -> PathBuf {
        PathBuf::from(CERTS_DIR).join(class.directory_name())
    }

    /// Directory holding profiles for `environment`
    pub fn profile_dir(environment: Environment) -> PathBuf {
        PathBuf::from(PROFILES_DIR).join(environment.as_str())
    }

    /// Profile file name, e.g. `AppStore_com.example.app.mobileprovision`
    pub fn profile_file_name(platform: Platform, environment: Environment, app_identifier: &str) -> String {
        let suffix = if platform == Platform::Tvos { "_tvos" } else { "" };
        format!(
            "{}_{}{}.{}",
            environment.label(),
            app_identifier,
            suffix,
            platform.profile_extension()
        )
    }

    /// Path of one bundle file
    pub fn path(key: &BundleKey, kind: EntryKind) -> PathBuf {
        match kind {
            EntryKind::Certificate => Self::certificate_dir(key.certificate_class())
                .join(format!("{}.cer", key.certificate_id)),
            EntryKind::PrivateKey => Self::certificate_dir(key.certificate_class())
                .join(format!("{}.p12", key.certificate_id)),
            EntryKind::Profile => Self::profile_dir(key.environment).join(Self::profile_file_name(
                key.platform,
                key.environment,
                &key.app_identifier,
            )),
        }
    }

    /// All three files of a bundle
    pub fn entries(key: &BundleKey) -> Vec<StoreEntry> {
        EntryKind::ALL
            .iter()
            .map(|&kind| StoreEntry {
                kind,
                path: Self::path(key, kind),
            })
            .collect()
    }
}

/// Resolve the store path of one bundle file from raw strings.
///
/// Fails with an input error before anything touches disk when the platform,
/// environment, app identifier or certificate id is invalid.
pub fn resolve_path(
    kind: EntryKind,
    platform: &str,
    environment: &str,
    app_identifier: &str,
    certificate_id: &str,
) -> Result<PathBuf> {
    let key = BundleKey::parse(platform, environment, app_identifier, certificate_id)?;
    Ok(StoreLayout::path(&key, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use certsync_core::InputError;
    use std::path::Path;

    #[test]
    fn test_known_answer_paths() {
        let cert = resolve_path(EntryKind::Certificate, "ios", "development", "com.example.app", "ABC123").unwrap();
        let key = resolve_path(EntryKind::PrivateKey, "ios", "development", "com.example.app", "ABC123").unwrap();
        let profile = resolve_path(EntryKind::Profile, "ios", "development", "com.example.app", "ABC123").unwrap();

        assert_eq!(cert, Path::new("certs/Development/ABC123.cer"));
        assert_eq!(key, Path::new("certs/Development/ABC123.p12"));
        assert_eq!(
            profile,
            Path::new("profiles/development/Development_com.example.app.mobileprovision")
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let first = resolve_path(EntryKind::Profile, "tvos", "appstore", "com.example.tv", "XYZ").unwrap();
        let second = resolve_path(EntryKind::Profile, "tvos", "appstore", "com.example.tv", "XYZ").unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            Path::new("profiles/appstore/AppStore_com.example.tv_tvos.mobileprovision")
        );
    }

    #[test]
    fn test_distribution_environments_share_certificate_dir() {
        let adhoc = resolve_path(EntryKind::Certificate, "ios", "adhoc", "com.example.app", "D1").unwrap();
        let appstore = resolve_path(EntryKind::Certificate, "ios", "appstore", "com.example.app", "D1").unwrap();
        assert_eq!(adhoc, appstore);
        assert_eq!(adhoc, Path::new("certs/Distribution/D1.cer"));
    }

    #[test]
    fn test_macos_profiles() {
        let profile = resolve_path(EntryKind::Profile, "macos", "developer_id", "com.example.mac", "M1").unwrap();
        assert_eq!(
            profile,
            Path::new("profiles/developer_id/Direct_com.example.mac.provisionprofile")
        );
        let cert = resolve_path(EntryKind::Certificate, "macos", "developer_id", "com.example.mac", "M1").unwrap();
        assert_eq!(cert, Path::new("certs/DeveloperIDApplication/M1.cer"));
    }

    #[test]
    fn test_enterprise_label() {
        let profile = resolve_path(EntryKind::Profile, "ios", "enterprise", "com.example.app", "E1").unwrap();
        assert_eq!(
            profile,
            Path::new("profiles/enterprise/InHouse_com.example.app.mobileprovision")
        );
    }

    #[test]
    fn test_bogus_environment() {
        let err = resolve_path(EntryKind::Profile, "ios", "bogus", "com.example.app", "ABC123").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InputValidation(InputError::UnsupportedEnvironment(ref env)) if env == "bogus"
        ));
    }

    #[test]
    fn test_unsupported_platform() {
        let err = resolve_path(EntryKind::Certificate, "android", "development", "com.example.app", "A").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InputValidation(InputError::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn test_path_traversal_identifiers_rejected() {
        let err = resolve_path(EntryKind::Profile, "ios", "development", "../escape", "A").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InputValidation(InputError::InvalidValue { .. })
        ));
        let err = resolve_path(EntryKind::Certificate, "ios", "development", "com.example.app", "../A").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InputValidation(InputError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_entries_cover_bundle() {
        let key = BundleKey::parse("ios", "development", "com.example.app", "ABC123").unwrap();
        let entries = StoreLayout::entries(&key);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, EntryKind::Certificate);
        assert_eq!(entries[2].path, StoreLayout::path(&key, EntryKind::Profile));
    }
}
