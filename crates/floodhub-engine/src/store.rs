//! Persistent key/value storage for the hub configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use floodhub_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Keys under which configuration values are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKey {
    DeviceName,
    FilterByName,
    FilterByUuid,
    FilterUuid,
    #[serde(rename = "ble_power")]
    TxPower,
    #[serde(rename = "ble_interval")]
    ScanInterval,
    #[serde(rename = "ble_duration")]
    ScanDuration,
    #[serde(rename = "ble_mtu")]
    LocalMtu,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 8] = [
        Self::DeviceName,
        Self::FilterByName,
        Self::FilterByUuid,
        Self::FilterUuid,
        Self::TxPower,
        Self::ScanInterval,
        Self::ScanDuration,
        Self::LocalMtu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceName => "device_name",
            Self::FilterByName => "filter_by_name",
            Self::FilterByUuid => "filter_by_uuid",
            Self::FilterUuid => "filter_uuid",
            Self::TxPower => "ble_power",
            Self::ScanInterval => "ble_interval",
            Self::ScanDuration => "ble_duration",
            Self::LocalMtu => "ble_mtu",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConfigValue {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    Str(String),
}

/// Backing store for configuration values.
pub trait ConfigStore: Send + Sync {
    /// Read a value. `None` when the key was never written.
    fn get(&self, key: ConfigKey) -> Result<Option<ConfigValue>>;

    /// Write a value, making it durable before returning.
    fn set(&mut self, key: ConfigKey, value: ConfigValue) -> Result<()>;
}

/// Volatile store, used in tests and when no config file is given.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<ConfigKey, ConfigValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: ConfigKey) -> Result<Option<ConfigValue>> {
        Ok(self.values.get(&key).cloned())
    }

    fn set(&mut self, key: ConfigKey, value: ConfigValue) -> Result<()> {
        self.values.insert(key, value);
        Ok(())
    }
}

/// Store backed by a JSON document on disk.
///
/// The whole document is rewritten on every `set`, through a temporary file
/// renamed over the original so a crash never leaves a torn file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<ConfigKey, ConfigValue>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), keys = values.len(), "opened config store");
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.values)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self, key: ConfigKey) -> Result<Option<ConfigValue>> {
        Ok(self.values.get(&key).cloned())
    }

    fn set(&mut self, key: ConfigKey, value: ConfigValue) -> Result<()> {
        self.values.insert(key, value);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get(ConfigKey::TxPower).unwrap(), None);

        store.set(ConfigKey::TxPower, ConfigValue::I8(-3)).unwrap();
        assert_eq!(store.get(ConfigKey::TxPower).unwrap(), Some(ConfigValue::I8(-3)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        store
            .set(ConfigKey::DeviceName, ConfigValue::Str("Porch".into()))
            .unwrap();
        store.set(ConfigKey::LocalMtu, ConfigValue::U16(185)).unwrap();
        drop(store);

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            store.get(ConfigKey::DeviceName).unwrap(),
            Some(ConfigValue::Str("Porch".into()))
        );
        assert_eq!(store.get(ConfigKey::LocalMtu).unwrap(), Some(ConfigValue::U16(185)));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_store_uses_flat_key_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.json");
        let mut store = JsonFileStore::open(&path).unwrap();
        store.set(ConfigKey::ScanDuration, ConfigValue::U8(15)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"ble_duration\""));
    }

    #[test]
    fn test_json_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(JsonFileStore::open(&path), Err(Error::Storage(_))));
    }

    #[test]
    fn test_key_names() {
        assert_eq!(ConfigKey::TxPower.to_string(), "ble_power");
        assert_eq!(ConfigKey::FilterUuid.to_string(), "filter_uuid");
    }
}
