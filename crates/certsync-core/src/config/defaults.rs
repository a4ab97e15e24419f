//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "certsync.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "certsync.yaml";

/// Default git branch for the store
pub const DEFAULT_BRANCH: &str = "master";

/// Default environment variable for the store passphrase
pub const DEFAULT_PASSPHRASE_ENV: &str = "CERTSYNC_PASSWORD";

/// Default environment variable for a raw store key
pub const DEFAULT_KEY_ENV: &str = "CERTSYNC_KEY";

/// Default store identifier
pub const DEFAULT_STORE_ID: &str = "default";

/// Default number of publish attempts
pub const DEFAULT_MAX_PUBLISH_ATTEMPTS: u32 = 3;

/// Upper bound for publish attempts
pub const MAX_PUBLISH_ATTEMPTS_LIMIT: u32 = 10;

/// Default delay between publish attempts
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".certsync.toml",
        ".certsync.yaml",
    ]
}

/// Example configuration written by `certsync` tooling
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# certsync configuration

[storage]
mode = "git"
url = "git@github.com:example/certificates.git"
branch = "master"

[encryption]
mode = "passphrase"
passphrase_env = "CERTSYNC_PASSWORD"

[publish]
max_attempts = 3
retry_backoff_ms = 500
"#;
