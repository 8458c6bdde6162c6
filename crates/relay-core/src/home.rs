//! Home directory and well-known path resolution
//!
//! # Precedence
//!
//! 1. `RELAY_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default
//!
//! The coordination record and heartbeat files live under the OS temporary
//! directory, which every process of the same user resolves identically.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "RELAY_HOME";

/// Directory name used under the temp dir and `~/.config`
pub const APP_DIR: &str = "asset-relay";

/// Get the home directory for asset-relay configuration.
///
/// # Errors
///
/// Returns an error if `RELAY_HOME` is unset and the platform home directory
/// cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}

/// Global config file: `<home>/.config/asset-relay/config.toml`
pub fn global_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config").join(APP_DIR).join("config.toml")
}

/// Shared runtime directory: `<temp>/asset-relay`
pub fn runtime_dir() -> PathBuf {
    std::env::temp_dir().join(APP_DIR)
}

/// Default coordination record location
pub fn default_record_path() -> PathBuf {
    runtime_dir().join("coordination.json")
}

/// Default directory for per-instance heartbeat files
pub fn default_heartbeat_dir() -> PathBuf {
    runtime_dir().join("heartbeats")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn with_relay_home<F: FnOnce()>(value: Option<&str>, f: F) {
        let original = env::var(HOME_ENV).ok();
        // SAFETY: tests touching RELAY_HOME are serialized.
        unsafe {
            match value {
                Some(v) => env::set_var(HOME_ENV, v),
                None => env::remove_var(HOME_ENV),
            }
        }
        f();
        unsafe {
            match original {
                Some(v) => env::set_var(HOME_ENV, v),
                None => env::remove_var(HOME_ENV),
            }
        }
    }

    #[test]
    #[serial]
    fn test_relay_home_set() {
        with_relay_home(Some("/custom/home"), || {
            assert_eq!(get_home_dir().unwrap(), PathBuf::from("/custom/home"));
            assert_eq!(
                global_config_path(&get_home_dir().unwrap()),
                PathBuf::from("/custom/home/.config/asset-relay/config.toml")
            );
        });
    }

    #[test]
    #[serial]
    fn test_relay_home_blank_falls_back() {
        with_relay_home(Some("   "), || {
            let home = get_home_dir();
            if let Some(platform) = dirs::home_dir() {
                assert_eq!(home.unwrap(), platform);
            }
        });
    }

    #[test]
    fn test_runtime_paths_share_root() {
        assert!(default_record_path().starts_with(runtime_dir()));
        assert!(default_heartbeat_dir().starts_with(runtime_dir()));
        assert!(runtime_dir().starts_with(env::temp_dir()));
    }
}
