//! Shared logging initialization for asset-relay binaries.

use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

/// Environment variable selecting the log level
pub const LOG_ENV: &str = "RELAY_LOG";

fn parse_level(value: Option<&str>) -> tracing::Level {
    match value.unwrap_or("info").trim().to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Initialize process-level tracing output from `RELAY_LOG`.
///
/// Only the first call installs the subscriber. Never fails.
pub fn init() {
    let level = parse_level(std::env::var(LOG_ENV).ok().as_deref());
    init_with_level(level);
}

/// Initialize tracing output at an explicit level.
pub fn init_with_level(level: tracing::Level) {
    if INIT.get().is_some() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    let _ = INIT.set(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("DEBUG")), tracing::Level::DEBUG);
        assert_eq!(parse_level(Some(" warn ")), tracing::Level::WARN);
        assert_eq!(parse_level(Some("bogus")), tracing::Level::INFO);
        assert_eq!(parse_level(None), tracing::Level::INFO);
    }
}
