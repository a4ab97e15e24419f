//! certsync core - shared types and configuration
//!
//! This crate provides the domain types (platforms, environments, bundle
//! keys), the error taxonomy shared by the storage and git crates, and the
//! configuration loader for an encrypted credential store.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, GitError, InputError, Result};
pub use types::{BundleKey, CertificateClass, Environment, Platform};
