//! Callbacks the hub fires toward the upstream bridge.

use std::fmt;
use std::sync::Arc;

use floodhub_core::{DeviceName, MacAddress, SlotId};

type DeviceFoundFn = dyn Fn(SlotId, MacAddress, &DeviceName) + Send + Sync;
type AllFoundFn = dyn Fn() + Send + Sync;
type SlotFn = dyn Fn(SlotId) + Send + Sync;
type PowerFn = dyn Fn(MacAddress, bool) + Send + Sync;

/// Optional event callbacks.
///
/// Each one is registered on its own; setting one never clears another.
/// Callbacks run on the hub task and must not block.
#[derive(Clone, Default)]
pub struct HubCallbacks {
    device_found: Option<Arc<DeviceFoundFn>>,
    all_devices_found: Option<Arc<AllFoundFn>>,
    connected: Option<Arc<SlotFn>>,
    disconnected: Option<Arc<SlotFn>>,
    power_changed: Option<Arc<PowerFn>>,
}

impl HubCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_device_found(
        mut self,
        f: impl Fn(SlotId, MacAddress, &DeviceName) + Send + Sync + 'static,
    ) -> Self {
        self.device_found = Some(Arc::new(f));
        self
    }

    pub fn on_all_devices_found(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.all_devices_found = Some(Arc::new(f));
        self
    }

    pub fn on_device_connected(mut self, f: impl Fn(SlotId) + Send + Sync + 'static) -> Self {
        self.connected = Some(Arc::new(f));
        self
    }

    pub fn on_device_disconnected(mut self, f: impl Fn(SlotId) + Send + Sync + 'static) -> Self {
        self.disconnected = Some(Arc::new(f));
        self
    }

    pub fn on_power_changed(mut self, f: impl Fn(MacAddress, bool) + Send + Sync + 'static) -> Self {
        self.power_changed = Some(Arc::new(f));
        self
    }

    pub fn has_power_changed(&self) -> bool {
        self.power_changed.is_some()
    }

    pub(crate) fn device_found(&self, slot: SlotId, address: MacAddress, name: &DeviceName) {
        if let Some(f) = &self.device_found {
            f(slot, address, name);
        }
    }

    pub(crate) fn all_devices_found(&self) {
        if let Some(f) = &self.all_devices_found {
            f();
        }
    }

    pub(crate) fn connected(&self, slot: SlotId) {
        if let Some(f) = &self.connected {
            f(slot);
        }
    }

    pub(crate) fn disconnected(&self, slot: SlotId) {
        if let Some(f) = &self.disconnected {
            f(slot);
        }
    }

    pub(crate) fn power_changed(&self, address: MacAddress, on: bool) {
        if let Some(f) = &self.power_changed {
            f(address, on);
        }
    }
}

impl fmt::Debug for HubCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubCallbacks")
            .field("device_found", &self.device_found.is_some())
            .field("all_devices_found", &self.all_devices_found.is_some())
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .field("power_changed", &self.power_changed.is_some())
            .finish()
    }
}
