//! Configuration validation
//!
//! Only store-wide settings are checked here. Backend parameters (URLs, bucket
//! names, credentials) are validated by the backend that consumes them.

use std::path::Component;

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::defaults::MAX_PUBLISH_ATTEMPTS_LIMIT;
use super::types::{Config, EncryptionMode};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!(storage = config.storage.mode_name(), "validating configuration");
    validate_prefix(config)?;
    validate_publish(config)?;
    validate_encryption(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_prefix(config: &Config) -> Result<()> {
    let Some(prefix) = &config.prefix else {
        return Ok(());
    };

    let path = std::path::Path::new(prefix);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

    if prefix.trim().is_empty() || escapes {
        return Err(ConfigError::invalid(
            "prefix",
            "must be a relative path inside the store",
        ));
    }

    Ok(())
}

fn validate_publish(config: &Config) -> Result<()> {
    let attempts = config.publish.max_attempts;
    if attempts == 0 || attempts > MAX_PUBLISH_ATTEMPTS_LIMIT {
        return Err(ConfigError::invalid(
            "publish.max_attempts",
            format!("must be between 1 and {}", MAX_PUBLISH_ATTEMPTS_LIMIT),
        ));
    }

    Ok(())
}

fn validate_encryption(config: &Config) -> Result<()> {
    let encryption = &config.encryption;

    match encryption.mode {
        EncryptionMode::Passphrase => {
            if encryption.passphrase_env.is_empty() {
                return Err(ConfigError::invalid(
                    "encryption.passphrase_env",
                    "cannot be empty",
                ));
            }
            if encryption.store_id.is_empty() {
                return Err(ConfigError::invalid("encryption.store_id", "cannot be empty"));
            }
            let kdf = &encryption.kdf;
            if kdf.iterations == 0 || kdf.parallelism == 0 {
                return Err(ConfigError::invalid(
                    "encryption.kdf",
                    "iterations and parallelism must be at least 1",
                ));
            }
            if kdf.memory_kib < 8 * kdf.parallelism {
                return Err(ConfigError::invalid(
                    "encryption.kdf.memory_kib",
                    "must be at least 8 KiB per lane",
                ));
            }
        }
        EncryptionMode::Key => {
            if encryption.key_env.is_empty() {
                return Err(ConfigError::invalid("encryption.key_env", "cannot be empty"));
            }
        }
        EncryptionMode::None => {
            debug!("store encryption disabled by configuration");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_attempt_bounds() {
        let mut config = Config::default();
        config.publish.max_attempts = 0;
        assert!(validate_config(&config).is_err());

        config.publish.max_attempts = MAX_PUBLISH_ATTEMPTS_LIMIT + 1;
        assert!(validate_config(&config).is_err());

        config.publish.max_attempts = 1;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_prefix_escape() {
        let mut config = Config::default();
        config.prefix = Some("../elsewhere".to_string());
        assert!(validate_config(&config).is_err());

        config.prefix = Some("/absolute".to_string());
        assert!(validate_config(&config).is_err());

        config.prefix = Some("team/ios".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_kdf_params() {
        let mut config = Config::default();
        config.encryption.kdf.memory_kib = 4;
        assert!(validate_config(&config).is_err());

        config.encryption.mode = EncryptionMode::None;
        assert!(validate_config(&config).is_ok());
    }
}
