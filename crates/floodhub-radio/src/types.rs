//! Request and event types shared by radio implementations.

use bytes::Bytes;
use floodhub_core::{AttrHandle, ConnectionId, MacAddress, SlotId, Uuid16};
use std::fmt;
use tokio::sync::mpsc;

/// Sending half of the radio event channel.
pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;

/// Receiving half of the radio event channel.
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// One advertisement seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: MacAddress,

    /// Complete local name, if advertised.
    pub name: Option<String>,

    /// 16-bit service UUIDs listed in the advertisement.
    pub service_uuids: Vec<Uuid16>,

    /// Received signal strength in dBm.
    pub rssi: i8,
}

impl Advertisement {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            name: None,
            service_uuids: Vec::new(),
            rssi: -127,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_service(mut self, uuid: Uuid16) -> Self {
        self.service_uuids.push(uuid);
        self
    }

    pub fn with_rssi(mut self, rssi: i8) -> Self {
        self.rssi = rssi;
        self
    }
}

/// Completion status carried by asynchronous events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    /// Stack-specific failure code.
    Failed(u8),
}

impl GattStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(code) => write!(f, "failed (0x{code:02X})"),
        }
    }
}

/// Inclusive attribute handle range of a discovered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRange {
    pub start: AttrHandle,
    pub end: AttrHandle,
}

impl ServiceRange {
    pub fn contains(&self, handle: AttrHandle) -> bool {
        (self.start..=self.end).contains(&handle)
    }
}

impl fmt::Display for ServiceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Characteristic property flags the engine cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharProperties {
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// A characteristic found in the local GATT cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid16,
    pub handle: AttrHandle,
    pub properties: CharProperties,
}

/// A descriptor found in the local GATT cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorInfo {
    pub uuid: Uuid16,
    pub handle: AttrHandle,
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// Asynchronous completion or notification from the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RadioEvent {
    /// An advertisement was received.
    ScanResult(Advertisement),

    /// The scan window elapsed.
    ScanComplete,

    /// A client registration finished.
    Registered { slot: SlotId, status: GattStatus },

    /// A link open request finished.
    Opened {
        slot: SlotId,
        conn_id: ConnectionId,
        address: MacAddress,
        status: GattStatus,
    },

    /// MTU exchange finished.
    MtuConfigured {
        slot: SlotId,
        mtu: u16,
        status: GattStatus,
    },

    /// A service was found during a search.
    ServiceFound {
        slot: SlotId,
        uuid: Uuid16,
        range: ServiceRange,
    },

    /// Service search finished.
    SearchComplete { slot: SlotId, status: GattStatus },

    /// Notification registration finished.
    NotifyRegistered {
        slot: SlotId,
        handle: AttrHandle,
        status: GattStatus,
    },

    /// A descriptor write finished.
    DescriptorWritten { slot: SlotId, status: GattStatus },

    /// A notification arrived.
    Notification {
        slot: SlotId,
        handle: AttrHandle,
        data: Bytes,
    },

    /// The link went down.
    Disconnected { slot: SlotId, reason: u8 },
}

impl RadioEvent {
    /// Slot the event belongs to, if any.
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::ScanResult(_) | Self::ScanComplete => None,
            Self::Registered { slot, .. }
            | Self::Opened { slot, .. }
            | Self::MtuConfigured { slot, .. }
            | Self::ServiceFound { slot, .. }
            | Self::SearchComplete { slot, .. }
            | Self::NotifyRegistered { slot, .. }
            | Self::DescriptorWritten { slot, .. }
            | Self::Notification { slot, .. }
            | Self::Disconnected { slot, .. } => Some(*slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: u16) -> AttrHandle {
        AttrHandle::new(raw).unwrap()
    }

    #[test]
    fn test_service_range_contains() {
        let range = ServiceRange {
            start: handle(0x28),
            end: handle(0x30),
        };
        assert!(range.contains(handle(0x28)));
        assert!(range.contains(handle(0x30)));
        assert!(!range.contains(handle(0x31)));
        assert_eq!(range.to_string(), "0x0028..=0x0030");
    }

    #[test]
    fn test_char_properties_writable() {
        let props = CharProperties {
            write_without_response: true,
            ..Default::default()
        };
        assert!(props.is_writable());
        assert!(!CharProperties::default().is_writable());
    }

    #[test]
    fn test_event_slot() {
        let slot = SlotId::new(1).unwrap();
        assert_eq!(RadioEvent::ScanComplete.slot(), None);
        assert_eq!(
            RadioEvent::Disconnected { slot, reason: 0x13 }.slot(),
            Some(slot)
        );
    }

    #[test]
    fn test_gatt_status_display() {
        assert_eq!(GattStatus::Success.to_string(), "success");
        assert_eq!(GattStatus::Failed(0x85).to_string(), "failed (0x85)");
        assert!(!GattStatus::Failed(1).is_success());
    }
}
