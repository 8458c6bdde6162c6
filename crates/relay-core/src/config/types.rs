//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// Shared-record coordination timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Override for the coordination record path (default: OS temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_path: Option<PathBuf>,
    /// Age after which an unverifiable hub record is reclaimable
    pub stale_after_secs: u64,
    /// Hub heartbeat period
    pub heartbeat_interval_ms: u64,
    /// Client poll period
    pub poll_interval_ms: u64,
    /// Routed batches older than this are dropped unprocessed
    pub pending_import_ttl_secs: u64,
    /// How long a show-window request waits for acknowledgment
    pub show_window_timeout_ms: u64,
    /// Poll step while waiting for show-window acknowledgment
    pub show_window_poll_ms: u64,
    /// Repeated launch/open actions inside this window are ignored
    pub launch_debounce_ms: u64,
    /// How long a record update waits for the store lock
    pub lock_timeout_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            record_path: None,
            stale_after_secs: 120,
            heartbeat_interval_ms: 1000,
            poll_interval_ms: 500,
            pending_import_ttl_secs: 30,
            show_window_timeout_ms: 3000,
            show_window_poll_ms: 100,
            launch_debounce_ms: 2000,
            lock_timeout_ms: 10_000,
        }
    }
}

impl CoordinationConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pending_import_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_import_ttl_secs)
    }

    pub fn show_window_timeout(&self) -> Duration {
        Duration::from_millis(self.show_window_timeout_ms)
    }

    pub fn show_window_poll(&self) -> Duration {
        Duration::from_millis(self.show_window_poll_ms)
    }

    pub fn launch_debounce(&self) -> Duration {
        Duration::from_millis(self.launch_debounce_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Socket ingest listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub host: String,
    pub port: u16,
    /// Maximum bytes per receive
    pub chunk_size: usize,
    /// Advisory listen backlog
    pub backlog: u32,
    /// Connections sending more than this are dropped unread
    pub max_payload_bytes: usize,
    /// A connection silent for this long is dropped
    pub read_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 24981,
            chunk_size: 8192,
            backlog: 5,
            max_payload_bytes: 16 * 1024 * 1024,
            read_timeout_ms: 10_000,
        }
    }
}

impl IngestConfig {
    /// `host:port` string suitable for binding or connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Import queue dispatch intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Re-check interval while an import runs or more are queued
    pub busy_interval_ms: u64,
    /// Re-check interval when the queue is empty
    pub idle_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            busy_interval_ms: 100,
            idle_interval_ms: 1000,
        }
    }
}

impl DispatchConfig {
    pub fn busy_interval(&self) -> Duration {
        Duration::from_millis(self.busy_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

/// Per-instance heartbeat files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    pub interval_secs: u64,
    pub max_age_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            dir: None,
            interval_secs: 30,
            max_age_secs: 2 * 60 * 60,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Config {
    /// Coordination record path, honouring the override.
    pub fn record_path(&self) -> PathBuf {
        self.coordination
            .record_path
            .clone()
            .unwrap_or_else(crate::home::default_record_path)
    }

    /// Heartbeat directory, honouring the override.
    pub fn heartbeat_dir(&self) -> PathBuf {
        self.heartbeat
            .dir
            .clone()
            .unwrap_or_else(crate::home::default_heartbeat_dir)
    }
}
