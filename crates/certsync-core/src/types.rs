//! Domain types for signing credentials

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Apple platform a bundle signs for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// iOS / iPadOS
    Ios,
    /// tvOS
    Tvos,
    /// macOS
    Macos,
}

impl Platform {
    /// Lowercase identifier used in configuration and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Tvos => "tvos",
            Self::Macos => "macos",
        }
    }

    /// File extension used for provisioning profiles on this platform
    pub fn profile_extension(&self) -> &'static str {
        match self {
            Self::Ios | Self::Tvos => "mobileprovision",
            Self::Macos => "provisionprofile",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Self::Ios),
            "tvos" => Ok(Self::Tvos),
            "macos" => Ok(Self::Macos),
            _ => Err(InputError::UnsupportedPlatform(s.to_string())),
        }
    }
}

/// Code-signing environment (provisioning profile type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Environment {
    /// Development profile
    #[serde(rename = "development")]
    Development,
    /// Ad-hoc distribution profile
    #[serde(rename = "adhoc")]
    AdHoc,
    /// App Store distribution profile
    #[serde(rename = "appstore")]
    AppStore,
    /// Enterprise (in-house) distribution profile
    #[serde(rename = "enterprise")]
    Enterprise,
    /// Developer ID (direct distribution outside the Mac App Store)
    #[serde(rename = "developer_id")]
    DeveloperId,
}

impl Environment {
    /// All supported environments
    pub const ALL: [Environment; 5] = [
        Self::Development,
        Self::AdHoc,
        Self::AppStore,
        Self::Enterprise,
        Self::DeveloperId,
    ];

    /// Canonical identifier, also the profile directory name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::AdHoc => "adhoc",
            Self::AppStore => "appstore",
            Self::Enterprise => "enterprise",
            Self::DeveloperId => "developer_id",
        }
    }

    /// Human-readable label used as the profile file name prefix
    pub fn label(&self) -> &'static str {
        match self {
            Self::Development => "Development",
            Self::AdHoc => "AdHoc",
            Self::AppStore => "AppStore",
            Self::Enterprise => "InHouse",
            Self::DeveloperId => "Direct",
        }
    }

    /// Certificate class used to sign for this environment
    pub fn certificate_class(&self) -> CertificateClass {
        match self {
            Self::Development => CertificateClass::Development,
            Self::AdHoc | Self::AppStore => CertificateClass::Distribution,
            Self::Enterprise => CertificateClass::Enterprise,
            Self::DeveloperId => CertificateClass::DeveloperIdApplication,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "adhoc" | "ad-hoc" | "ad_hoc" => Ok(Self::AdHoc),
            "appstore" | "app-store" | "app_store" => Ok(Self::AppStore),
            "enterprise" | "in-house" | "inhouse" => Ok(Self::Enterprise),
            "developer_id" | "developer-id" | "developerid" => Ok(Self::DeveloperId),
            _ => Err(InputError::UnsupportedEnvironment(s.to_string())),
        }
    }
}

/// Certificate class; certificate/key pairs are grouped by it in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateClass {
    /// Apple/iOS/Mac development certificate
    Development,
    /// App Store and ad-hoc distribution certificate
    Distribution,
    /// In-house distribution certificate
    Enterprise,
    /// Developer ID Application certificate
    DeveloperIdApplication,
}

impl CertificateClass {
    /// Directory name under `certs/`
    pub fn directory_name(&self) -> &'static str {
        match self {
            Self::Development => "Development",
            Self::Distribution => "Distribution",
            Self::Enterprise => "Enterprise",
            Self::DeveloperIdApplication => "DeveloperIDApplication",
        }
    }

    /// Joint developer-portal certificate type string for this class
    pub fn portal_types(&self, platform: Platform) -> &'static str {
        match (self, platform) {
            (Self::Development, Platform::Macos) => "MAC_APP_DEVELOPMENT,DEVELOPMENT",
            (Self::Development, _) => "IOS_DEVELOPMENT,DEVELOPMENT",
            (Self::Distribution | Self::Enterprise, Platform::Macos) => {
                "MAC_APP_DISTRIBUTION,DISTRIBUTION"
            }
            (Self::Distribution | Self::Enterprise, _) => "IOS_DISTRIBUTION,DISTRIBUTION",
            (Self::DeveloperIdApplication, _) => "DEVELOPER_ID_APPLICATION",
        }
    }
}

impl fmt::Display for CertificateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directory_name())
    }
}

fn app_identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*(\.\*)?$").expect("valid app identifier regex")
    })
}

fn certificate_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid certificate id regex"))
}

/// Identity of one credential bundle in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleKey {
    /// Target platform
    pub platform: Platform,
    /// Signing environment
    pub environment: Environment,
    /// Bundle identifier in reverse-DNS form
    pub app_identifier: String,
    /// Developer portal certificate id
    pub certificate_id: String,
}

impl BundleKey {
    /// Build a validated key
    pub fn new(
        platform: Platform,
        environment: Environment,
        app_identifier: impl Into<String>,
        certificate_id: impl Into<String>,
    ) -> Result<Self, InputError> {
        let app_identifier = app_identifier.into();
        let certificate_id = certificate_id.into();

        if !app_identifier_pattern().is_match(&app_identifier) {
            return Err(InputError::InvalidValue {
                field: "app identifier",
                value: app_identifier,
                message: "expected reverse-DNS form such as com.example.app".to_string(),
            });
        }

        if !certificate_id_pattern().is_match(&certificate_id) {
            return Err(InputError::InvalidValue {
                field: "certificate id",
                value: certificate_id,
                message: "only letters, digits, '-' and '_' are allowed".to_string(),
            });
        }

        if environment == Environment::DeveloperId && platform != Platform::Macos {
            return Err(InputError::InvalidValue {
                field: "environment",
                value: environment.to_string(),
                message: format!("developer_id is only available for macos, not {}", platform),
            });
        }

        Ok(Self {
            platform,
            environment,
            app_identifier,
            certificate_id,
        })
    }

    /// Parse a key from raw strings
    pub fn parse(
        platform: &str,
        environment: &str,
        app_identifier: &str,
        certificate_id: &str,
    ) -> Result<Self, InputError> {
        let platform = platform.parse()?;
        let environment = environment.parse()?;
        Self::new(platform, environment, app_identifier.trim(), certificate_id.trim())
    }

    /// Certificate class for this bundle
    pub fn certificate_class(&self) -> CertificateClass {
        self.environment.certificate_class()
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({})",
            self.platform, self.environment, self.app_identifier, self.certificate_id
        )
    }
}
