// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Crash-safe persistence of the last applied control state.
//!
//! The state lives in `<state_dir>/config.json` with a single backup
//! generation in `config.json.bak`. Writes go to a temp file in the same
//! directory which is then renamed over the destination, so readers only ever
//! see a complete file.

use crate::mode::PowerMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const BACKUP_FILE_NAME: &str = "config.json.bak";

/// Schema version written by this daemon.
pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Persisted types
// ---------------------------------------------------------------------------

/// Per-fan boost and manual flags. Fan 1 is the CPU fan, fan 2 the GPU fan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanProfiles {
    #[serde(default)]
    pub cpu_fan_boost: u8,
    #[serde(default)]
    pub gpu_fan_boost: u8,
    #[serde(default)]
    pub cpu_manual: bool,
    #[serde(default)]
    pub gpu_manual: bool,
}

/// The durable control state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConfig {
    pub power_mode: PowerMode,
    pub g_mode: bool,
    pub fan_profiles: FanProfiles,

    /// Replay this state onto the hardware at daemon startup.
    #[serde(default = "default_true")]
    pub auto_apply: bool,

    /// RFC 3339 timestamp of the last successful save.
    #[serde(default)]
    pub last_saved: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for PersistedConfig {
    fn default() -> Self {
        Self {
            power_mode: PowerMode::Balanced,
            g_mode: false,
            fan_profiles: FanProfiles::default(),
            auto_apply: true,
            last_saved: None,
            version: SCHEMA_VERSION.to_string(),
        }
    }
}

impl PersistedConfig {
    /// Range checks serde cannot express.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (name, boost) in [
            ("cpu_fan_boost", self.fan_profiles.cpu_fan_boost),
            ("gpu_fan_boost", self.fan_profiles.gpu_fan_boost),
        ] {
            if boost > 100 {
                return Err(StoreError::Invalid(format!("{name} out of range: {boost}")));
            }
        }
        Ok(())
    }
}

/// Check the shape of a parsed document and convert it.
///
/// Required: `power_mode` (one of the known labels), `g_mode` (bool) and
/// `fan_profiles` (object with boosts in 0-100).
pub fn validate_document(doc: Value) -> Result<PersistedConfig, StoreError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| StoreError::Invalid("top level is not an object".to_string()))?;

    for field in ["power_mode", "g_mode", "fan_profiles"] {
        if !obj.contains_key(field) {
            return Err(StoreError::Invalid(format!("missing required field: {field}")));
        }
    }

    let config: PersistedConfig =
        serde_json::from_value(doc).map_err(|e| StoreError::Invalid(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Reads and writes [`PersistedConfig`] under a privileged directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
    path: PathBuf,
    backup_path: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            path: dir.join(CONFIG_FILE_NAME),
            backup_path: dir.join(BACKUP_FILE_NAME),
            dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Load the persisted state. Never fails: falls back to the backup and
    /// then to defaults.
    pub fn load(&self) -> PersistedConfig {
        if !self.path.exists() {
            log::info!("No config file at {}, using defaults", self.path.display());
            let mut defaults = PersistedConfig::default();
            if let Err(e) = self.save(&mut defaults) {
                log::error!("Failed to write default config: {e}");
            }
            return defaults;
        }

        match self.read() {
            Ok(config) => config,
            Err(StoreError::Json(e)) => {
                log::error!("Config file corrupted: {e}");
                self.load_from_backup()
            }
            Err(e) => {
                log::warn!("{e}, using defaults");
                PersistedConfig::default()
            }
        }
    }

    fn read(&self) -> Result<PersistedConfig, StoreError> {
        let contents = fs::read_to_string(&self.path)?;
        let doc: Value = serde_json::from_str(&contents)?;
        let config = validate_document(doc)?;
        log::info!("Loaded config from {}", self.path.display());
        Ok(config)
    }

    fn load_from_backup(&self) -> PersistedConfig {
        if !self.backup_path.exists() {
            return PersistedConfig::default();
        }

        log::info!("Attempting to restore config from {}", self.backup_path.display());
        if let Err(e) = fs::copy(&self.backup_path, &self.path) {
            log::error!("Backup restore failed: {e}");
            return PersistedConfig::default();
        }

        self.read().unwrap_or_else(|e| {
            log::error!("Backup is unusable ({e}), using defaults");
            PersistedConfig::default()
        })
    }

    /// Validate and atomically persist `config`, stamping `last_saved`.
    pub fn save(&self, config: &mut PersistedConfig) -> Result<(), StoreError> {
        config.validate().inspect_err(|e| {
            log::error!("Refusing to save config: {e}");
        })?;
        config.last_saved = Some(chrono::Local::now().to_rfc3339());

        ensure_private_dir(&self.dir)?;

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, &self.backup_path) {
                log::warn!("Could not back up config: {e}");
            }
        }

        let contents = serde_json::to_string_pretty(config)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        log::info!("Saved config to {}", self.path.display());
        Ok(())
    }
}

fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    SCHEMA_VERSION.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom_config() -> PersistedConfig {
        PersistedConfig {
            power_mode: PowerMode::Custom,
            g_mode: true,
            fan_profiles: FanProfiles {
                cpu_fan_boost: 70,
                gpu_fan_boost: 0,
                cpu_manual: true,
                gpu_manual: false,
            },
            auto_apply: false,
            last_saved: None,
            version: SCHEMA_VERSION.to_string(),
        }
    }

    fn without_timestamp(mut c: PersistedConfig) -> PersistedConfig {
        c.last_saved = None;
        c
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("state"));
        let loaded = store.load();
        assert_eq!(without_timestamp(loaded), PersistedConfig::default());
        assert!(store.path().exists());
        let mode = fs::metadata(dir.path().join("state")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut cfg = custom_config();
        store.save(&mut cfg).unwrap();
        assert!(cfg.last_saved.is_some());

        let loaded = store.load();
        assert_eq!(without_timestamp(loaded), custom_config());

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_save_keeps_previous_generation_as_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut first = custom_config();
        store.save(&mut first).unwrap();
        let mut second = PersistedConfig::default();
        store.save(&mut second).unwrap();

        let backup: PersistedConfig =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(without_timestamp(backup), custom_config());
    }

    #[test]
    fn test_corrupt_primary_restores_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut first = custom_config();
        store.save(&mut first).unwrap();
        let mut second = PersistedConfig::default();
        store.save(&mut second).unwrap();

        fs::write(store.path(), "{ \"power_mode\": ").unwrap();
        assert_eq!(without_timestamp(store.load()), custom_config());
    }

    #[test]
    fn test_corrupt_primary_without_backup_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        fs::write(store.path(), "not json at all").unwrap();
        assert_eq!(store.load(), PersistedConfig::default());
    }

    #[test]
    fn test_schema_violations_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let bad_docs = [
            r#"{"g_mode": false, "fan_profiles": {}}"#,
            r#"{"power_mode": "Turbo", "g_mode": false, "fan_profiles": {}}"#,
            r#"{"power_mode": "Quiet", "g_mode": "yes", "fan_profiles": {}}"#,
            r#"{"power_mode": "Quiet", "g_mode": false, "fan_profiles": {"cpu_fan_boost": 150}}"#,
            r#"{"power_mode": "Quiet", "g_mode": false, "fan_profiles": {"gpu_fan_boost": -5}}"#,
            r#"[1, 2, 3]"#,
        ];
        for doc in bad_docs {
            fs::write(store.path(), doc).unwrap();
            assert_eq!(store.load(), PersistedConfig::default(), "doc: {doc}");
        }
    }

    #[test]
    fn test_minimal_document_fills_optional_fields() {
        let doc = serde_json::json!({
            "power_mode": "Performance",
            "g_mode": false,
            "fan_profiles": {"cpu_fan_boost": 0, "gpu_fan_boost": 0}
        });
        let cfg = validate_document(doc).unwrap();
        assert_eq!(cfg.power_mode, PowerMode::Performance);
        assert!(cfg.auto_apply);
        assert_eq!(cfg.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_save_rejects_invalid_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut cfg = PersistedConfig::default();
        cfg.fan_profiles.gpu_fan_boost = 101;
        assert!(matches!(store.save(&mut cfg), Err(StoreError::Invalid(_))));
        assert!(!store.path().exists());
    }
}
