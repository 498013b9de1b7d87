//! Service configuration
//!
//! Settings resolve CLI argument → environment variable → compiled default,
//! through the shared helpers in `subscan_common::config`.

use std::path::PathBuf;
use subscan_common::config::{resolve_db_path, resolve_port, resolve_string};

/// Resolved service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// SSE store poll interval
    pub sse_poll_ms: u64,
    /// SSE keep-alive ping interval
    pub sse_ping_ms: u64,
}

impl Config {
    /// Resolve configuration from optional CLI arguments
    pub fn resolve(host: Option<&str>, port: Option<u16>, db_path: Option<&str>) -> Self {
        Self {
            host: resolve_string(host, "SUBSCAN_HOST", "0.0.0.0"),
            port: resolve_port(port, "SUBSCAN_PORT", 5340),
            db_path: resolve_db_path(db_path, "SUBSCAN_DB_PATH", "data/subscan.db"),
            sse_poll_ms: resolve_string(None, "SUBSCAN_SSE_POLL_MS", "800")
                .parse()
                .unwrap_or(800),
            sse_ping_ms: resolve_string(None, "SUBSCAN_SSE_PING_MS", "2000")
                .parse()
                .unwrap_or(2000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let config = Config::resolve(Some("127.0.0.1"), Some(9999), Some("/tmp/x.db"));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9999);
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(None, None, None);
        assert_eq!(config.port, 5340);
        assert_eq!(config.sse_poll_ms, 800);
        assert_eq!(config.sse_ping_ms, 2000);
    }
}
