//! Configuration resolution
//!
//! Resolves configuration from multiple sources with priority:
//! 1. Command-line flags (passed as parameters)
//! 2. Environment variables
//! 3. Config file (`--config` path, else ~/.config/asset-relay/config.toml)
//! 4. Defaults

mod discovery;
mod types;

pub use discovery::{ConfigError, ConfigOverrides, load_config_file, resolve_config};
pub use types::{Config, CoordinationConfig, DispatchConfig, HeartbeatConfig, IngestConfig};
