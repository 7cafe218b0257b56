//! Hub configuration.
//!
//! [`HubConfig`] holds everything the engine reads at runtime. The persisted
//! part (filter, transmit power, scan timing, MTU) round-trips through a
//! [`ConfigStore`]; capacity and the flush delay are fixed at start-up.

use std::time::Duration;

use floodhub_core::{DeviceName, Error, Result, Uuid16, constants::*};
use floodhub_radio::Advertisement;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{ConfigKey, ConfigStore, ConfigValue};

/// Which advertisements count as fixtures.
///
/// Every enabled criterion must match. With no criterion enabled nothing
/// matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFilter {
    /// Match the complete local name exactly.
    pub by_name: bool,
    pub name: DeviceName,

    /// Match an advertised 16-bit service UUID.
    pub by_uuid: bool,
    pub uuid: Uuid16,
}

impl TargetFilter {
    pub fn is_enabled(&self) -> bool {
        self.by_name || self.by_uuid
    }

    pub fn matches(&self, adv: &Advertisement) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let name_ok = !self.by_name || adv.name.as_deref() == Some(self.name.as_str());
        let uuid_ok = !self.by_uuid || adv.service_uuids.contains(&self.uuid);
        name_ok && uuid_ok
    }

    /// Identifier recorded for a device this filter matched.
    pub fn matched_uuid(&self) -> Option<Uuid16> {
        self.by_uuid.then_some(self.uuid)
    }
}

impl Default for TargetFilter {
    fn default() -> Self {
        Self {
            by_name: true,
            name: DeviceName::default(),
            by_uuid: false,
            uuid: Uuid16(SERVICE_UUID),
        }
    }
}

/// Runtime configuration of the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    pub filter: TargetFilter,

    /// Transmit power in dBm.
    pub tx_power: i8,

    /// Seconds between scans.
    pub scan_interval: u8,

    /// Seconds each scan lasts.
    pub scan_duration: u8,

    /// Local ATT MTU.
    pub local_mtu: u16,

    /// Number of fixtures to manage.
    pub capacity: usize,

    /// Delay before a queued command is sent to a freshly resolved fixture.
    pub flush_delay_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            filter: TargetFilter::default(),
            tx_power: DEFAULT_TX_POWER,
            scan_interval: DEFAULT_SCAN_INTERVAL_SECS,
            scan_duration: DEFAULT_SCAN_DURATION_SECS,
            local_mtu: DEFAULT_LOCAL_MTU,
            capacity: MAX_DEVICES,
            flush_delay_ms: DEFAULT_FLUSH_DELAY_MS,
        }
    }
}

impl HubConfig {
    /// Set the number of fixtures to manage.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the queued command flush delay.
    pub fn flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.scan_duration))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.scan_interval))
    }

    pub fn flush_delay_duration(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    /// Check every field against its allowed range.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !TX_POWER_RANGE.contains(&self.tx_power) {
            return Err(Error::Config(format!(
                "tx_power must be {}..={} dBm, got {}",
                TX_POWER_RANGE.start(),
                TX_POWER_RANGE.end(),
                self.tx_power
            )));
        }
        if self.scan_interval == 0 {
            return Err(Error::Config("scan_interval must be at least 1s".into()));
        }
        if self.scan_duration == 0 {
            return Err(Error::Config("scan_duration must be at least 1s".into()));
        }
        if !(MIN_MTU..=MAX_MTU).contains(&self.local_mtu) {
            return Err(Error::Config(format!(
                "local_mtu must be {MIN_MTU}..={MAX_MTU}, got {}",
                self.local_mtu
            )));
        }
        if !(1..=MAX_DEVICES).contains(&self.capacity) {
            return Err(Error::Config(format!(
                "capacity must be 1..={MAX_DEVICES}, got {}",
                self.capacity
            )));
        }
        Ok(())
    }

    /// Load the persisted fields from `store`.
    ///
    /// Missing keys take their default and are written back. Values of the
    /// wrong type are treated as missing.
    pub fn load(store: &mut dyn ConfigStore) -> Result<Self> {
        let mut config = Self::default();
        for key in ConfigKey::ALL {
            match store.get(key)? {
                Some(value) if config.apply(key, &value) => {}
                Some(value) => {
                    warn!(key = %key, ?value, "ignoring invalid stored value");
                    store.set(key, config.value_of(key))?;
                }
                None => {
                    warn!(key = %key, "config key missing, persisting default");
                    store.set(key, config.value_of(key))?;
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Write every persisted field to `store`.
    pub fn persist(&self, store: &mut dyn ConfigStore) -> Result<()> {
        for key in ConfigKey::ALL {
            store.set(key, self.value_of(key))?;
        }
        Ok(())
    }

    /// Persisted keys whose values differ between `self` and `other`.
    pub fn changed_keys(&self, other: &Self) -> Vec<ConfigKey> {
        ConfigKey::ALL
            .into_iter()
            .filter(|&key| self.value_of(key) != other.value_of(key))
            .collect()
    }

    pub fn value_of(&self, key: ConfigKey) -> ConfigValue {
        match key {
            ConfigKey::DeviceName => ConfigValue::Str(self.filter.name.to_string()),
            ConfigKey::FilterByName => ConfigValue::Bool(self.filter.by_name),
            ConfigKey::FilterByUuid => ConfigValue::Bool(self.filter.by_uuid),
            ConfigKey::FilterUuid => ConfigValue::U16(self.filter.uuid.0),
            ConfigKey::TxPower => ConfigValue::I8(self.tx_power),
            ConfigKey::ScanInterval => ConfigValue::U8(self.scan_interval),
            ConfigKey::ScanDuration => ConfigValue::U8(self.scan_duration),
            ConfigKey::LocalMtu => ConfigValue::U16(self.local_mtu),
        }
    }

    fn apply(&mut self, key: ConfigKey, value: &ConfigValue) -> bool {
        match (key, value) {
            (ConfigKey::DeviceName, ConfigValue::Str(s)) => match DeviceName::new(s.as_str()) {
                Ok(name) => self.filter.name = name,
                Err(_) => return false,
            },
            (ConfigKey::FilterByName, ConfigValue::Bool(b)) => self.filter.by_name = *b,
            (ConfigKey::FilterByUuid, ConfigValue::Bool(b)) => self.filter.by_uuid = *b,
            (ConfigKey::FilterUuid, ConfigValue::U16(v)) => self.filter.uuid = Uuid16(*v),
            (ConfigKey::TxPower, ConfigValue::I8(v)) => self.tx_power = *v,
            (ConfigKey::ScanInterval, ConfigValue::U8(v)) => self.scan_interval = *v,
            (ConfigKey::ScanDuration, ConfigValue::U8(v)) => self.scan_duration = *v,
            (ConfigKey::LocalMtu, ConfigValue::U16(v)) => self.local_mtu = *v,
            _ => return false,
        }
        true
    }
}

/// A partial configuration change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub by_name: Option<bool>,
    pub device_name: Option<String>,
    pub by_uuid: Option<bool>,
    pub uuid: Option<Uuid16>,
    pub tx_power: Option<i8>,
    pub scan_interval: Option<u8>,
    pub scan_duration: Option<u8>,
    pub local_mtu: Option<u16>,
}

impl ConfigUpdate {
    /// Apply the update to a copy of `base` and validate the result.
    pub fn apply_to(&self, base: &HubConfig) -> Result<HubConfig> {
        let mut next = base.clone();
        if let Some(name) = &self.device_name {
            next.filter.name = DeviceName::new(name.as_str())?;
        }
        if let Some(by_name) = self.by_name {
            next.filter.by_name = by_name;
        }
        if let Some(by_uuid) = self.by_uuid {
            next.filter.by_uuid = by_uuid;
        }
        if let Some(uuid) = self.uuid {
            next.filter.uuid = uuid;
        }
        if let Some(tx_power) = self.tx_power {
            next.tx_power = tx_power;
        }
        if let Some(interval) = self.scan_interval {
            next.scan_interval = interval;
        }
        if let Some(duration) = self.scan_duration {
            next.scan_duration = duration;
        }
        if let Some(mtu) = self.local_mtu {
            next.local_mtu = mtu;
        }
        next.validate()?;
        Ok(next)
    }
}
