// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Daemon settings file handling.
//!
//! Operational settings (socket, limits, hotkey) live in TOML and are only
//! read, never written by the daemon. The control state itself is persisted
//! separately by [`crate::store`].
//! Default path: `/etc/g15-daemon/daemon.toml`

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/g15-daemon/daemon.toml";

/// Default daemon socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/g15-daemon.sock";

/// Default directory for the persisted control state.
pub const DEFAULT_STATE_DIR: &str = "/etc/g15-daemon";

/// Name of the keyboard that emits the G-Mode key.
pub const DEFAULT_KEYBOARD_NAME: &str = "AT Translated Set 2 keyboard";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Socket and state locations.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Admission limits for clients.
    #[serde(default)]
    pub security: SecurityConfig,

    /// G-Mode hotkey listener.
    #[serde(default)]
    pub hotkey: HotkeyConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path for the Unix domain socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Directory holding `config.json` and its backup.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Per-connection read/write timeout, in milliseconds.
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            state_dir: DEFAULT_STATE_DIR.to_string(),
            io_timeout_ms: default_io_timeout(),
        }
    }
}

impl DaemonConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Socket access and per-client limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Group given read/write access to the socket (mode 0660).
    /// Without one the socket is root-only (0600).
    #[serde(default)]
    pub socket_group: Option<String>,

    /// Make the socket world-writable (0666). Overrides `socket_group`.
    #[serde(default)]
    pub allow_world_access: bool,

    /// Maximum simultaneously served connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Requests allowed per client within one window.
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,

    /// Length of the sliding rate-limit window, in seconds.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// Lifetime of a session token, in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Whether mutating actions need a token from `authenticate`.
    #[serde(default = "default_true")]
    pub require_token: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            socket_group: None,
            allow_world_access: false,
            max_connections: default_max_connections(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window(),
            session_ttl_secs: default_session_ttl(),
            require_token: true,
        }
    }
}

impl SecurityConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

/// G-Mode key capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Substring matched against device names in `/proc/bus/input/devices`.
    #[serde(default = "default_keyboard_name")]
    pub keyboard_name: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keyboard_name: DEFAULT_KEYBOARD_NAME.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load settings from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No settings file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse settings: {e}"),
        )
    })?;

    let sec = &config.security;
    if sec.max_connections == 0 || sec.rate_limit_requests == 0 || sec.rate_limit_window_secs == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "max_connections and the rate limit must be positive",
        ));
    }

    log::info!("Loaded settings from {}", path.display());
    Ok(config)
}

/// Resolve the settings file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_state_dir() -> String {
    DEFAULT_STATE_DIR.to_string()
}

fn default_io_timeout() -> u64 {
    5000
}

fn default_max_connections() -> usize {
    64
}

fn default_rate_limit_requests() -> usize {
    50
}

fn default_rate_limit_window() -> u64 {
    10
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_keyboard_name() -> String {
    DEFAULT_KEYBOARD_NAME.to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("daemon.toml")).unwrap();
        assert_eq!(cfg.daemon.socket_path, DEFAULT_SOCKET_PATH);
        assert_eq!(cfg.security.rate_limit_requests, 50);
        assert_eq!(cfg.security.rate_limit_window(), Duration::from_secs(10));
        assert!(cfg.security.socket_group.is_none());
        assert!(!cfg.security.allow_world_access);
        assert!(cfg.hotkey.enabled);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        fs::write(
            &path,
            "[daemon]\nsocket_path = \"/tmp/g15.sock\"\n\n[security]\nsocket_group = \"users\"\n\n[hotkey]\nenabled = false\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.daemon.socket_path, "/tmp/g15.sock");
        assert_eq!(cfg.daemon.state_dir, DEFAULT_STATE_DIR);
        assert_eq!(cfg.security.socket_group.as_deref(), Some("users"));
        assert_eq!(cfg.security.max_connections, 64);
        assert!(!cfg.hotkey.enabled);
        assert_eq!(cfg.hotkey.keyboard_name, DEFAULT_KEYBOARD_NAME);
    }

    #[test]
    fn test_rejects_zero_limits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        fs::write(&path, "[security]\nmax_connections = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        fs::write(&path, "[daemon\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
