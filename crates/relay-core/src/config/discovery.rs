//! Configuration discovery and resolution

use super::types::Config;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("TOML parsing error in {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Environment variable holds an unusable value
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Explicit config file; parse failures are fatal for this path
    pub config_path: Option<PathBuf>,
    /// Override ingest port
    pub port: Option<u16>,
    /// Override coordination record path
    pub record_path: Option<PathBuf>,
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables (`RELAY_PORT`, `RELAY_RECORD_PATH`)
/// 3. Explicit config file, else the global config under `home_dir`
/// 4. Defaults
///
/// A broken global config is logged and ignored; a broken explicit config is
/// an error.
pub fn resolve_config(overrides: &ConfigOverrides, home_dir: &Path) -> Result<Config, ConfigError> {
    let mut config = match overrides.config_path {
        Some(ref path) => load_config_file(path)?,
        None => {
            let global = crate::home::global_config_path(home_dir);
            if global.exists() {
                match load_config_file(&global) {
                    Ok(file_config) => file_config,
                    Err(e) => {
                        warn!("Ignoring global config: {e}");
                        Config::default()
                    }
                }
            } else {
                debug!("No global config at {}", global.display());
                Config::default()
            }
        }
    };

    apply_env_overrides(&mut config)?;
    apply_cli_overrides(&mut config, overrides);

    Ok(config)
}

/// Load config from a TOML file
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(port) = std::env::var("RELAY_PORT") {
        config.ingest.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: "RELAY_PORT",
            value: port.clone(),
        })?;
    }

    if let Ok(path) = std::env::var("RELAY_RECORD_PATH") {
        if !path.trim().is_empty() {
            config.coordination.record_path = Some(PathBuf::from(path.trim()));
        }
    }

    Ok(())
}

fn apply_cli_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(port) = overrides.port {
        config.ingest.port = port;
    }

    if let Some(ref path) = overrides.record_path {
        config.coordination.record_path = Some(path.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn clear_env() {
        // SAFETY: tests touching RELAY_* are serialized.
        unsafe {
            std::env::remove_var("RELAY_PORT");
            std::env::remove_var("RELAY_RECORD_PATH");
        }
    }

    fn write_global(home: &Path, body: &str) {
        let dir = home.join(".config/asset-relay");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.toml"), body).unwrap();
    }

    #[test]
    #[serial]
    fn test_defaults_without_files() {
        clear_env();
        let home = TempDir::new().unwrap();
        let config = resolve_config(&ConfigOverrides::default(), home.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_global_config_is_loaded() {
        clear_env();
        let home = TempDir::new().unwrap();
        write_global(home.path(), "[ingest]\nport = 25000\n");

        let config = resolve_config(&ConfigOverrides::default(), home.path()).unwrap();
        assert_eq!(config.ingest.port, 25000);
    }

    #[test]
    #[serial]
    fn test_broken_global_config_falls_back_to_defaults() {
        clear_env();
        let home = TempDir::new().unwrap();
        write_global(home.path(), "[ingest\nport = ");

        let config = resolve_config(&ConfigOverrides::default(), home.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_broken_explicit_config_is_an_error() {
        clear_env();
        let home = TempDir::new().unwrap();
        let path = home.path().join("custom.toml");
        fs::write(&path, "not = [valid").unwrap();

        let overrides = ConfigOverrides {
            config_path: Some(path),
            ..Default::default()
        };
        let result = resolve_config(&overrides, home.path());
        assert!(matches!(result, Err(ConfigError::TomlParse { .. })));
    }

    #[test]
    #[serial]
    fn test_env_then_cli_precedence() {
        clear_env();
        let home = TempDir::new().unwrap();
        write_global(home.path(), "[ingest]\nport = 25000\n");
        unsafe {
            std::env::set_var("RELAY_PORT", "26000");
            std::env::set_var("RELAY_RECORD_PATH", "/env/record.json");
        }

        let config = resolve_config(&ConfigOverrides::default(), home.path()).unwrap();
        assert_eq!(config.ingest.port, 26000);
        assert_eq!(config.record_path(), PathBuf::from("/env/record.json"));

        let overrides = ConfigOverrides {
            port: Some(27000),
            record_path: Some(PathBuf::from("/cli/record.json")),
            ..Default::default()
        };
        let config = resolve_config(&overrides, home.path()).unwrap();
        assert_eq!(config.ingest.port, 27000);
        assert_eq!(config.record_path(), PathBuf::from("/cli/record.json"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_port() {
        clear_env();
        let home = TempDir::new().unwrap();
        unsafe { std::env::set_var("RELAY_PORT", "not-a-port") };

        let result = resolve_config(&ConfigOverrides::default(), home.path());
        assert!(matches!(result, Err(ConfigError::InvalidEnv { name: "RELAY_PORT", .. })));

        clear_env();
    }
}
