//! Configuration resolution
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Compiled default (fallback)

use std::path::PathBuf;

/// Resolve a string setting through the priority chain
pub fn resolve_string(cli_arg: Option<&str>, env_var_name: &str, default: &str) -> String {
    if let Some(v) = cli_arg {
        return v.to_string();
    }
    if let Ok(v) = std::env::var(env_var_name) {
        if !v.trim().is_empty() {
            return v;
        }
    }
    default.to_string()
}

/// Resolve a port setting through the priority chain
///
/// Unparseable environment values fall through to the default.
pub fn resolve_port(cli_arg: Option<u16>, env_var_name: &str, default: u16) -> u16 {
    if let Some(v) = cli_arg {
        return v;
    }
    if let Ok(v) = std::env::var(env_var_name) {
        if let Ok(port) = v.trim().parse::<u16>() {
            return port;
        }
    }
    default
}

/// Resolve the database path through the priority chain
pub fn resolve_db_path(cli_arg: Option<&str>, env_var_name: &str, default: &str) -> PathBuf {
    PathBuf::from(resolve_string(cli_arg, env_var_name, default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_wins_over_default() {
        let v = resolve_string(Some("cli-value"), "SUBSCAN_TEST_UNSET_VAR", "fallback");
        assert_eq!(v, "cli-value");
    }

    #[test]
    fn test_default_when_nothing_set() {
        let v = resolve_string(None, "SUBSCAN_TEST_UNSET_VAR_2", "fallback");
        assert_eq!(v, "fallback");
    }

    #[test]
    fn test_bad_port_env_falls_back() {
        std::env::set_var("SUBSCAN_TEST_BAD_PORT", "not-a-port");
        assert_eq!(resolve_port(None, "SUBSCAN_TEST_BAD_PORT", 8123), 8123);
        std::env::remove_var("SUBSCAN_TEST_BAD_PORT");
    }
}
