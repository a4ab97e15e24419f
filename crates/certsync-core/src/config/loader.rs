//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;
use super::validation::validate_config;

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io(e)
        }
    })?;

    let config = parse_config(&content, format == "TOML")?;
    debug!(path = %path.display(), "config loaded and validated");
    Ok(config)
}

/// Parse and validate configuration text
pub fn parse_config(content: &str, toml_format: bool) -> Result<Config> {
    let config: Config = if toml_format {
        toml::from_str(content)?
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;
    Ok(config)
}

/// Find configuration file in directory or parent directories.
///
/// Falls back to `<config dir>/certsync/` (e.g. `~/.config/certsync/`) when no
/// project-level file exists.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.is_file() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    let global_dir = dirs::config_dir()?.join("certsync");
    for name in config_file_names() {
        let config_path = global_dir.join(name);
        if config_path.is_file() {
            info!(path = %config_path.display(), "found global config file");
            return Some(config_path);
        }
    }

    debug!("no config file found");
    None
}

/// Load configuration from directory (searching parent directories)
pub fn load_config_from_dir(dir: &Path) -> Result<(Config, PathBuf)> {
    let config_path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;

    let config = load_config(&config_path)?;
    Ok((config, config_path))
}
