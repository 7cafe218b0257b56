//! Device manager: discovery, link lifecycle and control of fixtures.
//!
//! [`DeviceManager`] owns the registry, the scan controller and the radio.
//! Every mutation goes through `&mut self`, so running it on one task (see
//! [`Hub`](crate::Hub)) serializes radio events, timer events and control
//! calls without any locking.
//!
//! ```text
//!  RadioEvent ──►┐
//!  TimerEvent ──►├──► DeviceManager ──► RadioStack requests
//!  control    ──►┘         │
//!                          └──► HubCallbacks
//! ```
//!
//! Radio requests never complete inline. The manager submits a request,
//! records where the link is in its [`LinkState`], and picks up again when
//! the completion event arrives. A completion that does not fit the current
//! state is logged and dropped.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use floodhub_core::{
    AttrHandle, ConnectionId, DeviceName, Error, MacAddress, Result, SlotId, Uuid16,
    constants::*,
};
use floodhub_protocol::{LightCommand, decode_notification};
use floodhub_radio::{
    Advertisement, GattStatus, RadioEvent, RadioStack, ServiceRange, WriteType,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigUpdate, HubConfig};
use crate::connection::LinkState;
use crate::observer::HubCallbacks;
use crate::registry::{DeviceRegistry, PendingCommand};
use crate::scan::ScanController;
use crate::store::ConfigStore;

/// Deferred work scheduled by the manager itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The pause between two scans is over.
    ScanRestart { epoch: u64 },

    /// Send the queued command of a freshly resolved fixture.
    FlushPending { slot: SlotId, link_epoch: u64 },
}

pub type TimerSender = mpsc::UnboundedSender<TimerEvent>;
pub type TimerReceiver = mpsc::UnboundedReceiver<TimerEvent>;

/// What a control call did with its command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOutcome {
    /// Written to the fixture.
    Sent,

    /// Stored until the link is ready; a connection attempt was started.
    /// Delivery failures after this point are only logged.
    Queued,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubMetrics {
    pub discovered_count: usize,
    pub connected_count: usize,
}

/// Read-only view of one registry slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub index: usize,
    pub name: DeviceName,
    pub address: MacAddress,
    pub connected: bool,
    pub state: LinkState,
    pub matched_uuid: Option<Uuid16>,
    pub rssi: i8,
    pub power: Option<bool>,
    pub pending: bool,

    /// When the pending command was queued.
    pub queued_at: Option<DateTime<Utc>>,

    /// Negotiated MTU of the current link.
    pub mtu: Option<u16>,
    pub state_since: DateTime<Utc>,
    pub discovered_at: DateTime<Utc>,
}

pub struct DeviceManager<R: RadioStack> {
    radio: R,
    config: HubConfig,
    store: Box<dyn ConfigStore>,
    registry: DeviceRegistry,
    scan: ScanController,
    callbacks: HubCallbacks,
    timers: TimerSender,
    flush_timers: HashMap<SlotId, JoinHandle<()>>,

    /// A disabled filter is reported once per scan.
    filter_warned: bool,
}

impl<R: RadioStack> DeviceManager<R> {
    /// Create a manager and the receiver its timer events arrive on.
    ///
    /// # Errors
    /// Returns `Error::Config` if `config` does not validate.
    pub fn new(
        radio: R,
        config: HubConfig,
        store: Box<dyn ConfigStore>,
        callbacks: HubCallbacks,
    ) -> Result<(Self, TimerReceiver)> {
        config.validate()?;
        let registry = DeviceRegistry::with_capacity(config.capacity)?;
        let (timers, timer_rx) = mpsc::unbounded_channel();

        let manager = Self {
            radio,
            config,
            store,
            registry,
            scan: ScanController::new(),
            callbacks,
            timers,
            flush_timers: HashMap::new(),
            filter_warned: false,
        };
        Ok((manager, timer_rx))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn callbacks_mut(&mut self) -> &mut HubCallbacks {
        &mut self.callbacks
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_scanning()
    }

    /// Whether every slot has been filled since the last reset.
    pub fn all_devices_found(&self) -> bool {
        self.scan.is_complete()
    }

    /// Apply radio settings and begin discovery.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            "Starting hub: capacity {}, filter name={} ({}) uuid={} ({})",
            self.config.capacity,
            self.config.filter.name,
            self.config.filter.by_name,
            self.config.filter.uuid,
            self.config.filter.by_uuid,
        );
        if let Err(e) = self.radio.set_tx_power(self.config.tx_power).await {
            warn!("Failed to set tx power: {}", e);
        }
        if let Err(e) = self.radio.set_local_mtu(self.config.local_mtu).await {
            warn!("Failed to set local MTU: {}", e);
        }
        self.start_scan().await
    }

    // ========================================================================
    // Scanning
    // ========================================================================

    /// Start a scan. A no-op while scanning or once every slot is filled.
    pub async fn start_scan(&mut self) -> Result<()> {
        if self.registry.is_full() || !self.scan.begin() {
            trace!("Scan start skipped ({})", self.scan.state());
            return Ok(());
        }
        self.filter_warned = false;

        let duration = self.config.scan_duration();
        if let Err(e) = self.radio.start_scan(duration).await {
            self.scan.stop();
            return Err(e.into());
        }
        info!("Scanning for {:?}", duration);
        Ok(())
    }

    /// Stop scanning and cancel a pending restart. Safe in any state.
    pub async fn stop_scan(&mut self) -> Result<()> {
        self.scan.stop();
        self.radio.stop_scan().await?;
        debug!("Scan stopped");
        Ok(())
    }

    async fn on_scan_result(&mut self, adv: Advertisement) {
        if !self.config.filter.matches(&adv) {
            if !self.config.filter.is_enabled() && !self.filter_warned {
                warn!("Both name and UUID filters are disabled, no fixture can match");
                self.filter_warned = true;
            }
            return;
        }

        if let Some(slot) = self.registry.find_by_address(&adv.address) {
            if let Some(record) = self.registry.get_mut(slot) {
                record.rssi = adv.rssi;
            }
            trace!(slot = %slot, address = %adv.address, rssi = adv.rssi, "advertisement from known fixture");
            return;
        }
        if self.registry.is_rejected(&adv.address) {
            trace!(address = %adv.address, "ignoring parked address");
            return;
        }

        let name = adv
            .name
            .as_deref()
            .and_then(|n| DeviceName::from_advertised(n.as_bytes()))
            .or_else(|| DeviceName::new(adv.address.to_string()).ok());
        let Some(name) = name else {
            return;
        };
        let matched_uuid = self.config.filter.matched_uuid();
        let Some(slot) = self
            .registry
            .allocate(adv.address, name, adv.rssi, matched_uuid)
        else {
            debug!(address = %adv.address, "matching fixture ignored, no free slot");
            return;
        };

        info!("Fixture {} matched (rssi {}), registering in slot {}", adv.address, adv.rssi, slot);
        self.register(slot).await;
    }

    async fn on_scan_complete(&mut self) {
        if !self.scan.on_complete() {
            return;
        }
        if self.registry.is_full() {
            self.complete_discovery().await;
            return;
        }
        debug!(
            "Scan window over, {}/{} fixtures found",
            self.registry.discovered_count(),
            self.registry.capacity()
        );
        self.scan.arm_restart(self.config.scan_interval(), &self.timers);
    }

    async fn complete_discovery(&mut self) {
        let was_scanning = self.scan.is_scanning();
        let first = self.scan.mark_complete();
        if was_scanning {
            if let Err(e) = self.radio.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
        if first {
            info!("All {} fixtures found", self.registry.capacity());
            self.callbacks.all_devices_found();
        }
    }

    // ========================================================================
    // Client registration
    // ========================================================================

    /// Request a client registration for `slot`, retrying failed requests
    /// until the attempt budget is spent.
    async fn register(&mut self, slot: SlotId) {
        loop {
            let Some(record) = self.registry.get_mut(slot) else {
                return;
            };
            if record.registration_attempts >= MAX_REGISTRATION_ATTEMPTS {
                self.give_up_registration(slot);
                return;
            }
            record.registration_attempts += 1;
            record.registration_pending = true;
            let attempt = record.registration_attempts;

            match self.radio.register_client(slot).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(slot = %slot, attempt, "Client registration request failed: {}", e);
                    if let Some(record) = self.registry.get_mut(slot) {
                        record.registration_pending = false;
                    }
                }
            }
        }
    }

    fn give_up_registration(&mut self, slot: SlotId) {
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        record.registration_pending = false;
        record.connect_when_registered = false;

        if record.is_discovered() {
            warn!(
                "Re-registration of {} failed {} times, slot {} stays unregistered",
                record.address(),
                MAX_REGISTRATION_ATTEMPTS,
                slot
            );
        } else if let Some(record) = self.registry.abandon(slot) {
            warn!(
                "Registration of {} failed {} times, ignoring it until reset",
                record.address(),
                MAX_REGISTRATION_ATTEMPTS
            );
        }
    }

    async fn on_registered(&mut self, slot: SlotId, status: GattStatus) {
        let Some(record) = self.registry.get_mut(slot) else {
            debug!(slot = %slot, "registration event for empty slot");
            return;
        };
        record.registration_pending = false;

        if !status.is_success() {
            warn!(slot = %slot, "Client registration failed: {}", status);
            self.register(slot).await;
            return;
        }
        if let Err(e) = record.transition(LinkState::Registered) {
            debug!(slot = %slot, "Dropping stale registration event: {}", e);
            return;
        }
        record.registration_attempts = 0;
        let connect = std::mem::take(&mut record.connect_when_registered);
        let address = record.address();
        let name = record.name.clone();

        if self.registry.confirm_registration(slot) {
            info!("Fixture {} ({}) found in slot {}", address, name, slot);
            self.callbacks.device_found(slot, address, &name);
            if self.registry.is_full() {
                self.complete_discovery().await;
            }
        }

        if connect && let Err(e) = self.connect_slot(slot).await {
            warn!(slot = %slot, "Deferred connect failed: {}", e);
        }
    }

    // ========================================================================
    // Link lifecycle
    // ========================================================================

    async fn on_opened(
        &mut self,
        slot: SlotId,
        conn_id: ConnectionId,
        address: MacAddress,
        status: GattStatus,
    ) {
        let Some(record) = self.registry.get_mut(slot) else {
            debug!(slot = %slot, "open event for empty slot");
            return;
        };
        if record.address() != address {
            debug!(slot = %slot, %address, "open event for another address");
            return;
        }

        if !status.is_success() {
            if let Err(e) = record.transition(LinkState::Unregistered) {
                debug!(slot = %slot, "Dropping stale open failure: {}", e);
                return;
            }
            warn!("Failed to open link to {}: {}", address, status);
            record.connect_when_registered = false;
            record.registration_attempts = 0;
            if let Err(e) = self.radio.unregister_client(slot).await {
                warn!(slot = %slot, "Failed to release client: {}", e);
            }
            self.register(slot).await;
            return;
        }

        if let Err(e) = record.transition(LinkState::LinkUp) {
            debug!(slot = %slot, "Dropping stale open event: {}", e);
            if !record.is_connected()
                && let Err(e) = self.radio.close(slot, conn_id).await
            {
                warn!(slot = %slot, "Failed to close unexpected link: {}", e);
            }
            return;
        }
        record.clear_link();
        record.conn_id = Some(conn_id);
        info!("Link up to {} in slot {} ({})", address, slot, conn_id);
        self.callbacks.connected(slot);

        if let Err(e) = self.radio.request_mtu(slot, conn_id).await {
            warn!(slot = %slot, "MTU request failed, keeping default: {}", e);
            self.begin_search(slot, conn_id, MIN_MTU).await;
        }
    }

    async fn on_mtu_configured(&mut self, slot: SlotId, mtu: u16, status: GattStatus) {
        let Some(record) = self.registry.get(slot) else {
            return;
        };
        let (Some(conn_id), LinkState::LinkUp) = (record.conn_id, record.state()) else {
            debug!(slot = %slot, state = %record.state(), "Dropping stale MTU event");
            return;
        };
        let mtu = if status.is_success() {
            mtu
        } else {
            warn!(slot = %slot, "MTU exchange failed ({}), keeping default", status);
            MIN_MTU
        };
        self.begin_search(slot, conn_id, mtu).await;
    }

    async fn begin_search(&mut self, slot: SlotId, conn_id: ConnectionId, mtu: u16) {
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        if let Err(e) = record.transition(LinkState::MtuNegotiated) {
            debug!(slot = %slot, "Not searching services: {}", e);
            return;
        }
        record.mtu = mtu;
        debug!(slot = %slot, mtu, "searching services");

        if let Err(e) = self.radio.search_services(slot, conn_id, None).await {
            warn!(slot = %slot, "Service search failed: {}", e);
            self.stall(slot);
        }
    }

    fn on_service_found(&mut self, slot: SlotId, uuid: Uuid16, range: ServiceRange) {
        if uuid != Uuid16(SERVICE_UUID) {
            trace!(slot = %slot, %uuid, "ignoring unrelated service");
            return;
        }
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        if let Err(e) = record.transition(LinkState::ServiceFound) {
            debug!(slot = %slot, "Dropping stale service event: {}", e);
            return;
        }
        record.service_range = Some(range);
        debug!(slot = %slot, %range, "control service found");
    }

    async fn on_search_complete(&mut self, slot: SlotId, status: GattStatus) {
        let Some(record) = self.registry.get(slot) else {
            return;
        };
        let Some(conn_id) = record.conn_id.filter(|_| record.is_connected()) else {
            debug!(slot = %slot, "Dropping stale search completion");
            return;
        };
        if !status.is_success() {
            warn!(slot = %slot, "Service search failed: {}", status);
            self.stall(slot);
            return;
        }
        match (record.state(), record.service_range) {
            (LinkState::ServiceFound, Some(range)) => {
                let address = record.address();
                self.resolve_characteristics(slot, conn_id, address, range).await;
            }
            (LinkState::MtuNegotiated, _) => {
                warn!("Fixture {} does not offer the control service", record.address());
                self.stall(slot);
            }
            (state, _) => debug!(slot = %slot, %state, "Dropping stale search completion"),
        }
    }

    async fn resolve_characteristics(
        &mut self,
        slot: SlotId,
        conn_id: ConnectionId,
        address: MacAddress,
        range: ServiceRange,
    ) {
        match self.radio.characteristic_count(slot, conn_id, range).await {
            Ok(0) => {
                warn!("Control service of {} has no characteristics", address);
                self.stall(slot);
                return;
            }
            Ok(count) => debug!(slot = %slot, count, "characteristics in service"),
            Err(e) => {
                warn!("Failed to count characteristics of {}: {}", address, e);
                self.stall(slot);
                return;
            }
        }

        let notify = match self
            .radio
            .characteristic_by_uuid(slot, conn_id, range, Uuid16(NOTIFY_CHAR_UUID))
            .await
        {
            Ok(Some(c)) if c.properties.notify => Some(c.handle),
            Ok(Some(_)) => {
                warn!("Status characteristic of {} does not notify", address);
                None
            }
            Ok(None) => {
                warn!("Fixture {} has no status characteristic", address);
                None
            }
            Err(e) => {
                warn!("Status characteristic lookup on {} failed: {}", address, e);
                None
            }
        };
        let write = match self
            .radio
            .characteristic_by_uuid(slot, conn_id, range, Uuid16(WRITE_CHAR_UUID))
            .await
        {
            Ok(Some(c)) if c.properties.is_writable() => Some(c.handle),
            Ok(Some(_)) => {
                warn!("Control characteristic of {} is not writable", address);
                None
            }
            Ok(None) => {
                warn!("Fixture {} has no control characteristic", address);
                None
            }
            Err(e) => {
                warn!("Control characteristic lookup on {} failed: {}", address, e);
                None
            }
        };

        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        if let Err(e) = record.transition(LinkState::ServiceResolved) {
            debug!(slot = %slot, "Resolution outpaced by link change: {}", e);
            return;
        }
        record.notify_handle = notify;
        record.write_handle = write;
        info!(
            "Fixture {} resolved (control: {}, status: {})",
            address,
            write.is_some(),
            notify.is_some()
        );

        if let Some(handle) = notify
            && let Err(e) = self.radio.register_for_notify(slot, address, handle).await
        {
            warn!("Failed to register for notifications from {}: {}", address, e);
        }
        self.schedule_flush(slot).await;
    }

    fn stall(&mut self, slot: SlotId) {
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        record.resolution_stalled = true;
        if let Some(pending) = record.take_pending() {
            warn!(
                "Dropping queued {} for {}, fixture is not controllable",
                pending.command,
                record.address()
            );
        }
    }

    async fn on_notify_registered(&mut self, slot: SlotId, handle: AttrHandle, status: GattStatus) {
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        if !status.is_success() {
            warn!(slot = %slot, "Notification registration failed: {}", status);
            return;
        }
        if let Err(e) = record.transition(LinkState::NotifySubscribed) {
            debug!(slot = %slot, "Dropping stale notify registration: {}", e);
            return;
        }
        let Some(conn_id) = record.conn_id else {
            return;
        };
        let address = record.address();

        match self
            .radio
            .descriptor_by_uuid(slot, conn_id, handle, Uuid16(CCCD_UUID))
            .await
        {
            Ok(Some(descriptor)) => {
                let value = Bytes::from_static(&CCCD_ENABLE_NOTIFY);
                if let Err(e) = self
                    .radio
                    .write_descriptor(slot, conn_id, descriptor.handle, value)
                    .await
                {
                    warn!("Failed to enable notifications on {}: {}", address, e);
                }
            }
            Ok(None) => warn!("Fixture {} has no configuration descriptor", address),
            Err(e) => warn!("Descriptor lookup on {} failed: {}", address, e),
        }
    }

    fn on_descriptor_written(&mut self, slot: SlotId, status: GattStatus) {
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        if !status.is_success() {
            warn!(slot = %slot, "Enabling notifications failed: {}", status);
            return;
        }
        if record.state() != LinkState::NotifySubscribed {
            debug!(slot = %slot, state = %record.state(), "Dropping stale descriptor event");
            return;
        }
        if record.write_handle.is_none() {
            warn!(
                "Fixture {} notifies but has no command characteristic",
                record.address()
            );
            return;
        }
        match record.transition(LinkState::Ready) {
            Ok(_) => info!("Fixture {} ready", record.address()),
            Err(e) => debug!(slot = %slot, "Dropping stale descriptor event: {}", e),
        }
    }

    fn on_notification(&mut self, slot: SlotId, data: &[u8]) {
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        let Some(report) = decode_notification(data) else {
            trace!(slot = %slot, len = data.len(), "ignoring short notification");
            return;
        };
        if record.record_power(report.on) {
            let address = record.address();
            info!("Fixture {} power {}", address, if report.on { "on" } else { "off" });
            self.callbacks.power_changed(address, report.on);
        }
    }

    fn on_disconnected(&mut self, slot: SlotId, reason: u8) {
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        let was_linked = record.is_connected();
        if let Err(e) = record.transition(LinkState::Registered) {
            debug!(slot = %slot, "Dropping stale disconnect: {}", e);
            return;
        }
        record.clear_link();
        if let Some(timer) = self.flush_timers.remove(&slot) {
            timer.abort();
        }
        info!("Link to {} down (reason 0x{:02X})", record.address(), reason);
        if was_linked {
            self.callbacks.disconnected(slot);
        }
    }

    /// Feed one radio event through the state machine.
    pub async fn handle_radio_event(&mut self, event: RadioEvent) {
        trace!(?event, "radio event");
        match event {
            RadioEvent::ScanResult(adv) => self.on_scan_result(adv).await,
            RadioEvent::ScanComplete => self.on_scan_complete().await,
            RadioEvent::Registered { slot, status } => self.on_registered(slot, status).await,
            RadioEvent::Opened {
                slot,
                conn_id,
                address,
                status,
            } => self.on_opened(slot, conn_id, address, status).await,
            RadioEvent::MtuConfigured { slot, mtu, status } => {
                self.on_mtu_configured(slot, mtu, status).await
            }
            RadioEvent::ServiceFound { slot, uuid, range } => {
                self.on_service_found(slot, uuid, range)
            }
            RadioEvent::SearchComplete { slot, status } => {
                self.on_search_complete(slot, status).await
            }
            RadioEvent::NotifyRegistered {
                slot,
                handle,
                status,
            } => self.on_notify_registered(slot, handle, status).await,
            RadioEvent::DescriptorWritten { slot, status } => {
                self.on_descriptor_written(slot, status)
            }
            RadioEvent::Notification { slot, data, .. } => self.on_notification(slot, &data),
            RadioEvent::Disconnected { slot, reason } => self.on_disconnected(slot, reason),
            other => debug!(?other, "unhandled radio event"),
        }
    }

    /// Feed one timer event through the manager.
    pub async fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ScanRestart { epoch } => {
                if !self.scan.restart_due(epoch) {
                    trace!(epoch, "ignoring stale scan restart");
                    return;
                }
                if let Err(e) = self.start_scan().await {
                    warn!("Failed to restart scan: {}", e);
                }
            }
            TimerEvent::FlushPending { slot, link_epoch } => {
                self.flush_timers.remove(&slot);
                self.flush_pending(slot, link_epoch).await;
            }
        }
    }

    // ========================================================================
    // Pending commands
    // ========================================================================

    async fn schedule_flush(&mut self, slot: SlotId) {
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        if record.pending().is_none() {
            return;
        }
        if record.write_handle.is_none() {
            if let Some(pending) = record.take_pending() {
                warn!(
                    "Dropping queued {} for {}, fixture is not controllable",
                    pending.command,
                    record.address()
                );
            }
            return;
        }

        let link_epoch = record.link_epoch;
        let delay = self.config.flush_delay_duration();
        if delay.is_zero() {
            self.flush_pending(slot, link_epoch).await;
            return;
        }

        let timers = self.timers.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(TimerEvent::FlushPending { slot, link_epoch });
        });
        if let Some(previous) = self.flush_timers.insert(slot, timer) {
            previous.abort();
        }
        debug!(slot = %slot, ?delay, "queued command flush scheduled");
    }

    async fn flush_pending(&mut self, slot: SlotId, link_epoch: u64) {
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        let (Some(conn_id), Some(handle)) = (record.conn_id, record.write_handle) else {
            debug!(slot = %slot, "link gone before queued command could be sent");
            return;
        };
        if record.link_epoch != link_epoch || !record.can_write() {
            debug!(slot = %slot, "link changed before queued command could be sent");
            return;
        }
        let Some(pending) = record.take_pending() else {
            return;
        };
        let address = record.address();

        match self
            .radio
            .write_characteristic(slot, conn_id, handle, pending.frame.to_bytes(), WriteType::WithoutResponse)
            .await
        {
            Ok(()) => info!("Sent queued {} to {}", pending.command, address),
            Err(e) => warn!("Queued {} for {} failed: {}", pending.command, address, e),
        }
    }

    // ========================================================================
    // Control
    // ========================================================================

    pub async fn set_power(&mut self, address: MacAddress, on: bool) -> Result<ControlOutcome> {
        self.send_command(address, LightCommand::power(on)).await
    }

    /// Set brightness. Levels above 100 are clamped.
    pub async fn set_brightness(&mut self, address: MacAddress, level: u8) -> Result<ControlOutcome> {
        self.send_command(address, LightCommand::brightness(level)).await
    }

    pub async fn set_color(
        &mut self,
        address: MacAddress,
        r: u8,
        g: u8,
        b: u8,
    ) -> Result<ControlOutcome> {
        self.send_command(address, LightCommand::color(r, g, b)).await
    }

    /// Write `command` now if the fixture is controllable, otherwise queue it
    /// and start connecting.
    ///
    /// # Errors
    ///
    /// - `Error::DeviceNotFound` if no slot holds `address`
    /// - `Error::FrameTooLarge` if the command does not fit a frame
    /// - `Error::NotControllable` if the fixture's link resolved without a
    ///   control characteristic
    /// - `Error::Radio` if an immediate write is rejected
    pub async fn send_command(
        &mut self,
        address: MacAddress,
        command: LightCommand,
    ) -> Result<ControlOutcome> {
        let slot = self.registry.lookup(&address)?;
        let frame = command.to_frame()?;
        let record = self
            .registry
            .get_mut(slot)
            .ok_or_else(|| Error::DeviceNotFound(address.to_string()))?;

        if let (true, Some(conn_id), Some(handle)) =
            (record.can_write(), record.conn_id, record.write_handle)
        {
            // A direct write supersedes anything still queued.
            if let Some(stale) = record.take_pending() {
                debug!(slot = %slot, "discarding queued {}", stale.command);
            }
            if let Some(timer) = self.flush_timers.remove(&slot) {
                timer.abort();
            }
            self.radio
                .write_characteristic(slot, conn_id, handle, frame.to_bytes(), WriteType::WithoutResponse)
                .await?;
            debug!("Sent {} to {}", command, address);
            return Ok(ControlOutcome::Sent);
        }

        if record.is_uncontrollable() {
            return Err(Error::NotControllable(address.to_string()));
        }

        if let Some(replaced) = record.queue(PendingCommand::new(command, frame)) {
            debug!(slot = %slot, "{} replaces queued {}", command, replaced.command);
        }
        info!("Queued {} for {} until its link is ready", command, address);

        if let Err(e) = self.connect_slot(slot).await {
            warn!("Connect for queued command to {} failed: {}", address, e);
        }
        Ok(ControlOutcome::Queued)
    }

    /// Open a link to `address`. Succeeds without side effects when a link
    /// is already up or being set up.
    pub async fn connect(&mut self, address: MacAddress) -> Result<()> {
        let slot = self.registry.lookup(&address)?;
        self.connect_slot(slot).await
    }

    async fn connect_slot(&mut self, slot: SlotId) -> Result<()> {
        let record = self
            .registry
            .get_mut(slot)
            .ok_or_else(|| Error::DeviceNotFound(format!("slot {slot}")))?;

        match record.state() {
            LinkState::Registered => {
                record.transition(LinkState::Connecting)?;
                let address = record.address();
                if let Err(e) = self.radio.open(slot, address).await {
                    if let Some(record) = self.registry.get_mut(slot) {
                        let _ = record.transition(LinkState::Registered);
                    }
                    return Err(e.into());
                }
                info!("Opening link to {}", address);
                Ok(())
            }
            LinkState::Unregistered => {
                record.connect_when_registered = true;
                if !record.registration_pending {
                    record.registration_attempts = 0;
                    self.register(slot).await;
                }
                Ok(())
            }
            state => {
                trace!(slot = %slot, %state, "connect is a no-op");
                Ok(())
            }
        }
    }

    /// Close the link to `address`. Succeeds without side effects when no
    /// link is up.
    pub async fn disconnect(&mut self, address: MacAddress) -> Result<()> {
        let slot = self.registry.lookup(&address)?;
        let Some(record) = self.registry.get_mut(slot) else {
            return Ok(());
        };
        record.connect_when_registered = false;

        match record.conn_id {
            Some(conn_id) if record.is_connected() => {
                self.radio.close(slot, conn_id).await?;
                info!("Closing link to {}", address);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Forget every fixture and rediscover from scratch.
    pub async fn reset_device_list(&mut self) -> Result<()> {
        info!("Resetting device list");
        self.release_all().await;
        self.registry.clear();
        self.start_scan().await
    }

    /// Stop scanning, cancel timers and release every link and client.
    async fn release_all(&mut self) {
        self.scan.reset();
        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        for (_, timer) in self.flush_timers.drain() {
            timer.abort();
        }

        let slots: Vec<(SlotId, Option<ConnectionId>)> = self
            .registry
            .iter()
            .map(|r| (r.slot(), r.conn_id.filter(|_| r.is_connected())))
            .collect();
        for (slot, conn_id) in slots {
            if let Some(conn_id) = conn_id
                && let Err(e) = self.radio.close(slot, conn_id).await
            {
                warn!(slot = %slot, "Failed to close link: {}", e);
            }
            if let Err(e) = self.radio.unregister_client(slot).await {
                debug!(slot = %slot, "Failed to release client: {}", e);
            }
        }
    }

    // ========================================================================
    // Configuration and inspection
    // ========================================================================

    /// Apply a partial configuration change and persist what changed.
    ///
    /// A changed filter restarts discovery from scratch. Transmit power and
    /// MTU changes are pushed to the radio right away.
    pub async fn update_config(&mut self, update: ConfigUpdate) -> Result<HubConfig> {
        let next = update.apply_to(&self.config)?;
        let changed = self.config.changed_keys(&next);
        if changed.is_empty() {
            return Ok(next);
        }
        for key in &changed {
            self.store.set(*key, next.value_of(*key))?;
        }

        let filter_changed = self.config.filter != next.filter;
        let tx_changed = self.config.tx_power != next.tx_power;
        let mtu_changed = self.config.local_mtu != next.local_mtu;
        self.config = next;
        info!("Configuration updated: {:?}", changed);

        if tx_changed && let Err(e) = self.radio.set_tx_power(self.config.tx_power).await {
            warn!("Failed to set tx power: {}", e);
        }
        if mtu_changed && let Err(e) = self.radio.set_local_mtu(self.config.local_mtu).await {
            warn!("Failed to set local MTU: {}", e);
        }
        if filter_changed {
            self.reset_device_list().await?;
        }
        Ok(self.config.clone())
    }

    pub fn metrics(&self) -> HubMetrics {
        HubMetrics {
            discovered_count: self.registry.discovered_count(),
            connected_count: self.registry.connected_count(),
        }
    }

    /// Snapshot of every discovered fixture, in slot order.
    pub fn devices(&self) -> Vec<DeviceSnapshot> {
        self.registry
            .iter()
            .filter(|r| r.is_discovered())
            .map(|r| DeviceSnapshot {
                index: r.slot().index(),
                name: r.name.clone(),
                address: r.address(),
                connected: r.is_connected(),
                state: r.state(),
                matched_uuid: r.matched_uuid,
                rssi: r.rssi,
                power: r.power,
                pending: r.pending().is_some(),
                queued_at: r.pending().map(|p| p.queued_at),
                mtu: (r.state() >= LinkState::MtuNegotiated).then_some(r.mtu),
                state_since: r.state_since(),
                discovered_at: r.discovered_at,
            })
            .collect()
    }

    /// Release the radio before the manager is dropped.
    pub async fn shutdown(&mut self) {
        info!("Shutting down device manager");
        self.release_all().await;
    }
}

impl<R: RadioStack> Drop for DeviceManager<R> {
    fn drop(&mut self) {
        for (_, timer) in self.flush_timers.drain() {
            timer.abort();
        }
    }
}
