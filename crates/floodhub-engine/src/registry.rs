//! Fixed-capacity registry of discovered fixtures.
//!
//! The slot index is the allocation key: it is handed to the radio as the
//! client registration id, so every radio event routes back to its record
//! with an index lookup.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use floodhub_core::{
    AttrHandle, ConnectionId, DeviceName, Error, MacAddress, Result, SlotId, Uuid16,
    constants::{MAX_DEVICES, MIN_MTU},
};
use floodhub_protocol::{CommandFrame, LightCommand};
use floodhub_radio::ServiceRange;
use tracing::debug;

use crate::connection::{LinkMachine, LinkState, StateTransition};

/// A command waiting for its fixture's link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub command: LightCommand,
    pub frame: CommandFrame,
    pub queued_at: DateTime<Utc>,
}

impl PendingCommand {
    pub fn new(command: LightCommand, frame: CommandFrame) -> Self {
        Self {
            command,
            frame,
            queued_at: Utc::now(),
        }
    }
}

/// Everything the hub knows about one fixture.
#[derive(Debug)]
pub struct DeviceRecord {
    slot: SlotId,
    address: MacAddress,
    pub name: DeviceName,

    /// Signal strength of the latest matching advertisement.
    pub rssi: i8,

    /// Service UUID the fixture matched on, when filtering by UUID.
    pub matched_uuid: Option<Uuid16>,
    pub discovered_at: DateTime<Utc>,

    link: LinkMachine,
    discovered: bool,

    /// Registration requests made since the last success.
    pub registration_attempts: u8,
    pub registration_pending: bool,

    /// Open a link as soon as the client registration completes.
    pub connect_when_registered: bool,

    pub conn_id: Option<ConnectionId>,
    pub mtu: u16,
    pub service_range: Option<ServiceRange>,
    pub notify_handle: Option<AttrHandle>,
    pub write_handle: Option<AttrHandle>,

    /// Resolution stopped early; the link stays up without control.
    pub resolution_stalled: bool,

    /// Bumped every time a link opens or drops, so deferred work can tell
    /// whether the link it was scheduled for is still the current one.
    pub link_epoch: u64,

    /// Last reported power state. `None` until the first notification.
    pub power: Option<bool>,

    pending: Option<PendingCommand>,
}

impl DeviceRecord {
    fn new(
        slot: SlotId,
        address: MacAddress,
        name: DeviceName,
        rssi: i8,
        matched_uuid: Option<Uuid16>,
    ) -> Self {
        Self {
            slot,
            address,
            name,
            rssi,
            matched_uuid,
            discovered_at: Utc::now(),
            link: LinkMachine::new(),
            discovered: false,
            registration_attempts: 0,
            registration_pending: false,
            connect_when_registered: false,
            conn_id: None,
            mtu: MIN_MTU,
            service_range: None,
            notify_handle: None,
            write_handle: None,
            resolution_stalled: false,
            link_epoch: 0,
            power: None,
            pending: None,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn state(&self) -> LinkState {
        self.link.current_state()
    }

    /// When the link entered its current state.
    pub fn state_since(&self) -> DateTime<Utc> {
        self.link.state_since()
    }

    /// Move the link to `state`, rejecting transitions the lifecycle forbids.
    pub fn transition(&mut self, state: LinkState) -> Result<StateTransition> {
        let transition = self.link.transition_to(state)?;
        debug!(
            slot = %self.slot,
            address = %self.address,
            from = %transition.from,
            to = %transition.to,
            "link state changed"
        );
        Ok(transition)
    }

    /// Whether the fixture has been reported as found.
    pub fn is_discovered(&self) -> bool {
        self.discovered
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_linked()
    }

    /// Whether commands can be written right now.
    pub fn can_write(&self) -> bool {
        self.is_connected() && self.conn_id.is_some() && self.write_handle.is_some()
    }

    /// Whether resolution has finished and found no way to control the
    /// fixture over the current link.
    pub fn is_uncontrollable(&self) -> bool {
        self.is_connected()
            && self.write_handle.is_none()
            && (self.state().is_resolved() || self.resolution_stalled)
    }

    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Queue `command`, replacing any earlier one. Returns the replaced
    /// command.
    pub fn queue(&mut self, command: PendingCommand) -> Option<PendingCommand> {
        self.pending.replace(command)
    }

    pub fn take_pending(&mut self) -> Option<PendingCommand> {
        self.pending.take()
    }

    /// Cache a reported power state. Returns `true` when it differs from
    /// the previous report.
    pub fn record_power(&mut self, on: bool) -> bool {
        self.power.replace(on) != Some(on)
    }

    /// Forget everything learned over the current link.
    pub fn clear_link(&mut self) {
        self.conn_id = None;
        self.mtu = MIN_MTU;
        self.service_range = None;
        self.notify_handle = None;
        self.write_handle = None;
        self.resolution_stalled = false;
        self.link_epoch = self.link_epoch.wrapping_add(1);
    }
}

/// Fixed-capacity set of [`DeviceRecord`]s indexed by [`SlotId`].
#[derive(Debug)]
pub struct DeviceRegistry {
    slots: Vec<Option<DeviceRecord>>,

    /// Addresses whose registration was given up on. Ignored until cleared.
    rejected: HashSet<MacAddress>,
}

impl DeviceRegistry {
    /// Create a registry with `capacity` slots.
    ///
    /// # Errors
    /// Returns `Error::Config` unless `capacity` is in `1..=MAX_DEVICES`.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if !(1..=MAX_DEVICES).contains(&capacity) {
            return Err(Error::Config(format!(
                "registry capacity must be 1..={MAX_DEVICES}, got {capacity}"
            )));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            rejected: HashSet::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Take the lowest free slot for `address`.
    ///
    /// Returns `None` when the address already has a slot, is parked, or no
    /// slot is free.
    pub fn allocate(
        &mut self,
        address: MacAddress,
        name: DeviceName,
        rssi: i8,
        matched_uuid: Option<Uuid16>,
    ) -> Option<SlotId> {
        if self.find_by_address(&address).is_some() || self.is_rejected(&address) {
            return None;
        }
        let index = self.slots.iter().position(Option::is_none)?;
        let slot = SlotId::new(index).ok()?;
        self.slots[index] = Some(DeviceRecord::new(slot, address, name, rssi, matched_uuid));
        Some(slot)
    }

    pub fn find_by_address(&self, address: &MacAddress) -> Option<SlotId> {
        self.iter()
            .find(|record| record.address == *address)
            .map(DeviceRecord::slot)
    }

    pub fn get(&self, slot: SlotId) -> Option<&DeviceRecord> {
        self.slots.get(slot.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut DeviceRecord> {
        self.slots.get_mut(slot.index()).and_then(Option::as_mut)
    }

    /// Resolve `address` to its record.
    ///
    /// # Errors
    /// Returns `Error::DeviceNotFound` if no slot holds the address.
    pub fn lookup(&self, address: &MacAddress) -> Result<SlotId> {
        self.find_by_address(address)
            .ok_or_else(|| Error::DeviceNotFound(address.to_string()))
    }

    /// Mark the fixture in `slot` as found. Returns `true` only the first
    /// time, which is when it starts counting toward capacity.
    pub fn confirm_registration(&mut self, slot: SlotId) -> bool {
        match self.get_mut(slot) {
            Some(record) if !record.discovered => {
                record.discovered = true;
                true
            }
            _ => false,
        }
    }

    /// Release `slot` and park its address until [`clear`](Self::clear).
    pub fn abandon(&mut self, slot: SlotId) -> Option<DeviceRecord> {
        let record = self.slots.get_mut(slot.index())?.take()?;
        self.rejected.insert(record.address);
        Some(record)
    }

    pub fn is_rejected(&self, address: &MacAddress) -> bool {
        self.rejected.contains(address)
    }

    /// Drop every record and every parked address.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.rejected.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.slots.iter().flatten()
    }

    pub fn discovered_count(&self) -> usize {
        self.iter().filter(|r| r.discovered).count()
    }

    pub fn connected_count(&self) -> usize {
        self.iter().filter(|r| r.is_connected()).count()
    }

    /// Whether every slot holds a discovered fixture.
    pub fn is_full(&self) -> bool {
        self.discovered_count() >= self.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> MacAddress {
        MacAddress::new([0xAA, 0xBB, 0xCC, 0x00, 0x00, last])
    }

    fn name() -> DeviceName {
        DeviceName::default()
    }

    fn first_slot() -> SlotId {
        SlotId::new(0).unwrap()
    }

    fn registry_with(count: u8) -> DeviceRegistry {
        let mut registry = DeviceRegistry::with_capacity(3).unwrap();
        for i in 1..=count {
            let slot = registry.allocate(addr(i), name(), -50, None).unwrap();
            assert!(registry.confirm_registration(slot));
        }
        registry
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(DeviceRegistry::with_capacity(0).is_err());
        assert!(DeviceRegistry::with_capacity(MAX_DEVICES + 1).is_err());
        assert_eq!(DeviceRegistry::with_capacity(2).unwrap().capacity(), 2);
    }

    #[test]
    fn test_allocate_uses_lowest_free_slot() {
        let mut registry = DeviceRegistry::with_capacity(3).unwrap();
        let first = registry.allocate(addr(1), name(), -40, None).unwrap();
        let second = registry.allocate(addr(2), name(), -40, None).unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        assert_eq!(registry.find_by_address(&addr(2)), Some(second));
        assert_eq!(registry.get(second).unwrap().address(), addr(2));
    }

    #[test]
    fn test_allocate_dedupes_by_address() {
        let mut registry = DeviceRegistry::with_capacity(3).unwrap();
        assert!(registry.allocate(addr(1), name(), -40, None).is_some());
        assert!(registry.allocate(addr(1), name(), -30, None).is_none());
    }

    #[test]
    fn test_allocate_fails_when_full() {
        let mut registry = registry_with(3);
        assert!(registry.is_full());
        assert!(registry.allocate(addr(4), name(), -40, None).is_none());
    }

    #[test]
    fn test_count_only_after_confirmation() {
        let mut registry = DeviceRegistry::with_capacity(3).unwrap();
        let slot = registry.allocate(addr(1), name(), -40, None).unwrap();
        assert_eq!(registry.discovered_count(), 0);
        assert!(registry.confirm_registration(slot));
        assert!(!registry.confirm_registration(slot));
        assert_eq!(registry.discovered_count(), 1);
    }

    #[test]
    fn test_abandon_parks_address_until_clear() {
        let mut registry = DeviceRegistry::with_capacity(3).unwrap();
        let slot = registry.allocate(addr(1), name(), -40, None).unwrap();
        registry.abandon(slot).unwrap();

        assert!(registry.get(slot).is_none());
        assert!(registry.is_rejected(&addr(1)));
        assert!(registry.allocate(addr(1), name(), -40, None).is_none());

        registry.clear();
        assert!(registry.allocate(addr(1), name(), -40, None).is_some());
    }

    #[test]
    fn test_lookup_unknown_address() {
        let registry = registry_with(1);
        assert!(matches!(
            registry.lookup(&addr(9)),
            Err(Error::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_pending_is_last_write_wins() {
        let mut registry = registry_with(1);
        let slot = registry.find_by_address(&addr(1)).unwrap();
        let record = registry.get_mut(slot).unwrap();

        let first = LightCommand::power(true);
        let second = LightCommand::brightness(40);
        assert!(
            record
                .queue(PendingCommand::new(first, first.to_frame().unwrap()))
                .is_none()
        );
        let replaced = record
            .queue(PendingCommand::new(second, second.to_frame().unwrap()))
            .unwrap();
        assert_eq!(replaced.command, first);
        assert_eq!(record.pending().unwrap().command, second);
        assert_eq!(record.take_pending().unwrap().command, second);
        assert!(record.pending().is_none());
    }

    #[test]
    fn test_record_power_reports_changes() {
        let mut registry = registry_with(1);
        let record = registry.get_mut(first_slot()).unwrap();
        assert!(record.record_power(false));
        assert!(!record.record_power(false));
        assert!(record.record_power(true));
        assert_eq!(record.power, Some(true));
    }

    #[test]
    fn test_connected_count_follows_link_state() {
        let mut registry = registry_with(2);
        let record = registry.get_mut(first_slot()).unwrap();
        record.transition(LinkState::Registered).unwrap();
        record.transition(LinkState::Connecting).unwrap();
        assert_eq!(registry.connected_count(), 0);

        let record = registry.get_mut(first_slot()).unwrap();
        record.transition(LinkState::LinkUp).unwrap();
        record.conn_id = Some(ConnectionId(1));
        assert!(!record.can_write());
        assert!(!record.is_uncontrollable());
        assert_eq!(registry.connected_count(), 1);
    }

    #[test]
    fn test_clear_link_resets_handles_and_bumps_epoch() {
        let mut registry = registry_with(1);
        let record = registry.get_mut(first_slot()).unwrap();
        record.conn_id = Some(ConnectionId(4));
        record.write_handle = AttrHandle::new(0x2D);
        record.resolution_stalled = true;
        let epoch = record.link_epoch;

        record.clear_link();
        assert!(record.conn_id.is_none());
        assert!(record.write_handle.is_none());
        assert!(!record.resolution_stalled);
        assert_eq!(record.link_epoch, epoch + 1);
    }
}
