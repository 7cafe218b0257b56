//! In-process radio stack for tests and the demo binary.
//!
//! [`MockRadio`] records every request it receives. A [`MockRadioHandle`]
//! inspects that log, injects request failures, and pushes events by hand.
//!
//! With auto-respond enabled the mock also plays the part of the fixtures
//! added through [`MockRadioHandle::add_fixture`]: it advertises them during
//! scans, answers registration, link, MTU, service search and descriptor
//! requests the way a real stack would, keeps each fixture's power state in
//! step with the power frames written to it, and echoes a status
//! notification after every write once notifications are enabled.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use floodhub_core::{AttrHandle, ConnectionId, MacAddress, SlotId, Uuid16, constants::*};
use floodhub_protocol::{CommandFrame, LightCommand};
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::{debug, trace};

use crate::error::{RadioError, Result};
use crate::traits::RadioStack;
use crate::types::{
    Advertisement, CharProperties, CharacteristicInfo, DescriptorInfo, GattStatus, RadioEvent,
    RadioEventReceiver, RadioEventSender, ServiceRange, WriteType,
};

// Attribute layout of a simulated fixture.
const SERVICE_START: AttrHandle = AttrHandle::new(0x0028).unwrap();
const NOTIFY_CHAR_HANDLE: AttrHandle = AttrHandle::new(0x002A).unwrap();
const CCCD_HANDLE: AttrHandle = AttrHandle::new(0x002B).unwrap();
const WRITE_CHAR_HANDLE: AttrHandle = AttrHandle::new(0x002D).unwrap();
const SERVICE_END: AttrHandle = AttrHandle::new(0x0030).unwrap();

/// Status code used when a simulated link can not be opened.
pub const STATUS_CONN_FAILED: u8 = 0x85;

/// Disconnect reason reported for a locally closed link.
pub const REASON_LOCAL_HOST: u8 = 0x16;

/// Disconnect reason reported when a fixture drops off.
pub const REASON_TIMEOUT: u8 = 0x08;

/// Opcode of the status notification a simulated fixture sends.
const STATUS_OPCODE: u8 = 0x21;

/// A request as recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioRequest {
    StartScan { duration: Duration },
    StopScan,
    Register { slot: SlotId },
    Unregister { slot: SlotId },
    Open { slot: SlotId, address: MacAddress },
    Close { slot: SlotId, conn_id: ConnectionId },
    RequestMtu { slot: SlotId, conn_id: ConnectionId },
    SearchServices {
        slot: SlotId,
        conn_id: ConnectionId,
        filter: Option<Uuid16>,
    },
    RegisterForNotify {
        slot: SlotId,
        address: MacAddress,
        handle: AttrHandle,
    },
    Write {
        slot: SlotId,
        conn_id: ConnectionId,
        handle: AttrHandle,
        value: Bytes,
        write_type: WriteType,
    },
    WriteDescriptor {
        slot: SlotId,
        conn_id: ConnectionId,
        handle: AttrHandle,
        value: Bytes,
    },
    SetTxPower { dbm: i8 },
    SetLocalMtu { mtu: u16 },
}

impl RadioRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::StartScan { .. } => RequestKind::StartScan,
            Self::StopScan => RequestKind::StopScan,
            Self::Register { .. } => RequestKind::Register,
            Self::Unregister { .. } => RequestKind::Unregister,
            Self::Open { .. } => RequestKind::Open,
            Self::Close { .. } => RequestKind::Close,
            Self::RequestMtu { .. } => RequestKind::RequestMtu,
            Self::SearchServices { .. } => RequestKind::SearchServices,
            Self::RegisterForNotify { .. } => RequestKind::RegisterForNotify,
            Self::Write { .. } => RequestKind::Write,
            Self::WriteDescriptor { .. } => RequestKind::WriteDescriptor,
            Self::SetTxPower { .. } => RequestKind::SetTxPower,
            Self::SetLocalMtu { .. } => RequestKind::SetLocalMtu,
        }
    }
}

/// Request categories, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    StartScan,
    StopScan,
    Register,
    Unregister,
    Open,
    Close,
    RequestMtu,
    SearchServices,
    RegisterForNotify,
    Write,
    WriteDescriptor,
    SetTxPower,
    SetLocalMtu,
    /// Attribute cache lookups (count, characteristic, descriptor).
    AttributeLookup,
}

/// A simulated floodlight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub address: MacAddress,
    pub name: Option<String>,
    pub service_uuids: Vec<Uuid16>,
    pub rssi: i8,
    /// Whether open requests succeed.
    pub reachable: bool,
    pub has_service: bool,
    pub has_write_char: bool,
    pub has_notify_char: bool,
    pub has_cccd: bool,
    pub mtu: u16,
    pub power: bool,
}

impl Fixture {
    /// A fixture with the complete vendor profile.
    pub fn floodlight(address: MacAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: Some(name.into()),
            service_uuids: vec![Uuid16(SERVICE_UUID)],
            rssi: -60,
            reachable: true,
            has_service: true,
            has_write_char: true,
            has_notify_char: true,
            has_cccd: true,
            mtu: DEFAULT_LOCAL_MTU,
            power: false,
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn without_service(mut self) -> Self {
        self.has_service = false;
        self
    }

    pub fn without_write_char(mut self) -> Self {
        self.has_write_char = false;
        self
    }

    pub fn without_notify_char(mut self) -> Self {
        self.has_notify_char = false;
        self
    }

    pub fn without_cccd(mut self) -> Self {
        self.has_cccd = false;
        self
    }

    pub fn with_rssi(mut self, rssi: i8) -> Self {
        self.rssi = rssi;
        self
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement {
            address: self.address,
            name: self.name.clone(),
            service_uuids: self.service_uuids.clone(),
            rssi: self.rssi,
        }
    }

    fn characteristics(&self) -> Vec<CharacteristicInfo> {
        let mut chars = Vec::new();
        if self.has_notify_char {
            chars.push(CharacteristicInfo {
                uuid: Uuid16(NOTIFY_CHAR_UUID),
                handle: NOTIFY_CHAR_HANDLE,
                properties: CharProperties {
                    read: true,
                    notify: true,
                    ..Default::default()
                },
            });
        }
        if self.has_write_char {
            chars.push(CharacteristicInfo {
                uuid: Uuid16(WRITE_CHAR_UUID),
                handle: WRITE_CHAR_HANDLE,
                properties: CharProperties {
                    write_without_response: true,
                    ..Default::default()
                },
            });
        }
        chars
    }
}

fn service_range() -> ServiceRange {
    ServiceRange {
        start: SERVICE_START,
        end: SERVICE_END,
    }
}

#[derive(Debug, Clone, Copy)]
struct Link {
    slot: SlotId,
    address: MacAddress,
    notifying: bool,
}

#[derive(Debug)]
struct MockState {
    requests: Vec<RadioRequest>,
    failures: HashMap<RequestKind, usize>,
    auto_respond: bool,
    fixtures: HashMap<MacAddress, Fixture>,
    registered: HashSet<SlotId>,
    links: HashMap<ConnectionId, Link>,
    next_conn_id: u16,
    local_mtu: u16,
    tx_power: i8,
    scan_generation: u64,
    scanning: bool,
}

impl MockState {
    fn new() -> Self {
        Self {
            requests: Vec::new(),
            failures: HashMap::new(),
            auto_respond: false,
            fixtures: HashMap::new(),
            registered: HashSet::new(),
            links: HashMap::new(),
            next_conn_id: 0,
            local_mtu: DEFAULT_LOCAL_MTU,
            tx_power: DEFAULT_TX_POWER,
            scan_generation: 0,
            scanning: false,
        }
    }

    fn take_failure(&mut self, kind: RequestKind) -> bool {
        match self.failures.get_mut(&kind) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn link(&self, conn_id: ConnectionId) -> Result<Link> {
        self.links
            .get(&conn_id)
            .copied()
            .ok_or(RadioError::UnknownConnection { conn_id: conn_id.0 })
    }

    fn fixture_for(&self, conn_id: ConnectionId) -> Result<&Fixture> {
        let link = self.link(conn_id)?;
        self.fixtures
            .get(&link.address)
            .ok_or(RadioError::UnknownConnection { conn_id: conn_id.0 })
    }
}

/// Mock radio stack.
///
/// # Examples
///
/// ```
/// use floodhub_radio::mock::{MockRadio, RadioRequest};
/// use floodhub_radio::RadioStack;
/// use floodhub_core::SlotId;
///
/// #[tokio::main]
/// async fn main() -> floodhub_radio::Result<()> {
///     let (radio, handle, _events) = MockRadio::new();
///     radio.register_client(SlotId::new(0).unwrap()).await?;
///
///     let requests = handle.requests().await;
///     assert_eq!(requests, vec![RadioRequest::Register { slot: SlotId::new(0).unwrap() }]);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockRadio {
    state: Arc<Mutex<MockState>>,
    events: RadioEventSender,
}

impl MockRadio {
    /// Create a mock radio, its control handle, and the event receiver the
    /// engine should consume.
    pub fn new() -> (Self, MockRadioHandle, RadioEventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockState::new()));

        let radio = Self {
            state: state.clone(),
            events: events.clone(),
        };
        let handle = MockRadioHandle { state, events };
        (radio, handle, rx)
    }

    /// Record `request`, then fail it if a failure was queued for its kind.
    async fn submit(&self, request: RadioRequest) -> Result<MutexGuard<'_, MockState>> {
        let mut state = self.state.lock().await;
        let kind = request.kind();
        trace!(?request, "mock radio request");
        state.requests.push(request);
        if state.take_failure(kind) {
            debug!(?kind, "mock radio injecting failure");
            return Err(RadioError::rejected(format!("{kind:?}"), "injected failure"));
        }
        Ok(state)
    }

    async fn lookup(&self) -> Result<MutexGuard<'_, MockState>> {
        let mut state = self.state.lock().await;
        if state.take_failure(RequestKind::AttributeLookup) {
            return Err(RadioError::rejected("attribute lookup", "injected failure"));
        }
        Ok(state)
    }

    fn emit(&self, event: RadioEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| RadioError::ChannelClosed)
    }
}

impl RadioStack for MockRadio {
    async fn start_scan(&self, duration: Duration) -> Result<()> {
        let mut state = self.submit(RadioRequest::StartScan { duration }).await?;
        state.scanning = true;
        state.scan_generation += 1;
        if !state.auto_respond {
            return Ok(());
        }

        let mut fixtures: Vec<&Fixture> = state.fixtures.values().collect();
        fixtures.sort_by_key(|f| f.address);
        for fixture in fixtures {
            self.emit(RadioEvent::ScanResult(fixture.advertisement()))?;
        }

        let generation = state.scan_generation;
        let shared = self.state.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut state = shared.lock().await;
            if state.scanning && state.scan_generation == generation {
                state.scanning = false;
                let _ = events.send(RadioEvent::ScanComplete);
            }
        });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut state = self.submit(RadioRequest::StopScan).await?;
        state.scanning = false;
        Ok(())
    }

    async fn register_client(&self, slot: SlotId) -> Result<()> {
        let mut state = self.submit(RadioRequest::Register { slot }).await?;
        state.registered.insert(slot);
        if state.auto_respond {
            self.emit(RadioEvent::Registered {
                slot,
                status: GattStatus::Success,
            })?;
        }
        Ok(())
    }

    async fn unregister_client(&self, slot: SlotId) -> Result<()> {
        let mut state = self.submit(RadioRequest::Unregister { slot }).await?;
        state.registered.remove(&slot);
        state.links.retain(|_, link| link.slot != slot);
        Ok(())
    }

    async fn open(&self, slot: SlotId, address: MacAddress) -> Result<()> {
        let mut state = self.submit(RadioRequest::Open { slot, address }).await?;
        if !state.registered.contains(&slot) {
            return Err(RadioError::NotRegistered { slot: slot.index() });
        }
        if !state.auto_respond {
            return Ok(());
        }

        let reachable = state.fixtures.get(&address).is_some_and(|f| f.reachable);
        state.next_conn_id = state.next_conn_id.wrapping_add(1);
        let conn_id = ConnectionId(state.next_conn_id);
        let status = if reachable {
            state.links.insert(
                conn_id,
                Link {
                    slot,
                    address,
                    notifying: false,
                },
            );
            GattStatus::Success
        } else {
            GattStatus::Failed(STATUS_CONN_FAILED)
        };
        self.emit(RadioEvent::Opened {
            slot,
            conn_id,
            address,
            status,
        })
    }

    async fn close(&self, slot: SlotId, conn_id: ConnectionId) -> Result<()> {
        let mut state = self.submit(RadioRequest::Close { slot, conn_id }).await?;
        if !state.auto_respond {
            return Ok(());
        }
        state.link(conn_id)?;
        state.links.remove(&conn_id);
        self.emit(RadioEvent::Disconnected {
            slot,
            reason: REASON_LOCAL_HOST,
        })
    }

    async fn request_mtu(&self, slot: SlotId, conn_id: ConnectionId) -> Result<()> {
        let state = self.submit(RadioRequest::RequestMtu { slot, conn_id }).await?;
        if !state.auto_respond {
            return Ok(());
        }
        let mtu = state.fixture_for(conn_id)?.mtu.min(state.local_mtu);
        self.emit(RadioEvent::MtuConfigured {
            slot,
            mtu,
            status: GattStatus::Success,
        })
    }

    async fn search_services(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
        filter: Option<Uuid16>,
    ) -> Result<()> {
        let state = self
            .submit(RadioRequest::SearchServices {
                slot,
                conn_id,
                filter,
            })
            .await?;
        if !state.auto_respond {
            return Ok(());
        }
        let fixture = state.fixture_for(conn_id)?;
        let uuid = Uuid16(SERVICE_UUID);
        if fixture.has_service && filter.is_none_or(|f| f == uuid) {
            self.emit(RadioEvent::ServiceFound {
                slot,
                uuid,
                range: service_range(),
            })?;
        }
        self.emit(RadioEvent::SearchComplete {
            slot,
            status: GattStatus::Success,
        })
    }

    async fn characteristic_count(
        &self,
        _slot: SlotId,
        conn_id: ConnectionId,
        range: ServiceRange,
    ) -> Result<u16> {
        let state = self.lookup().await?;
        let fixture = state.fixture_for(conn_id)?;
        let count = fixture
            .characteristics()
            .iter()
            .filter(|c| range.contains(c.handle))
            .count();
        Ok(u16::try_from(count).unwrap_or(u16::MAX))
    }

    async fn characteristic_by_uuid(
        &self,
        _slot: SlotId,
        conn_id: ConnectionId,
        range: ServiceRange,
        uuid: Uuid16,
    ) -> Result<Option<CharacteristicInfo>> {
        let state = self.lookup().await?;
        let fixture = state.fixture_for(conn_id)?;
        Ok(fixture
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && range.contains(c.handle)))
    }

    async fn descriptor_by_uuid(
        &self,
        _slot: SlotId,
        conn_id: ConnectionId,
        characteristic: AttrHandle,
        uuid: Uuid16,
    ) -> Result<Option<DescriptorInfo>> {
        let state = self.lookup().await?;
        let fixture = state.fixture_for(conn_id)?;
        let found = fixture.has_cccd
            && fixture.has_notify_char
            && characteristic == NOTIFY_CHAR_HANDLE
            && uuid == Uuid16(CCCD_UUID);
        Ok(found.then(|| DescriptorInfo {
            uuid,
            handle: CCCD_HANDLE,
        }))
    }

    async fn register_for_notify(
        &self,
        slot: SlotId,
        address: MacAddress,
        handle: AttrHandle,
    ) -> Result<()> {
        let state = self
            .submit(RadioRequest::RegisterForNotify {
                slot,
                address,
                handle,
            })
            .await?;
        if state.auto_respond {
            self.emit(RadioEvent::NotifyRegistered {
                slot,
                handle,
                status: GattStatus::Success,
            })?;
        }
        Ok(())
    }

    async fn write_characteristic(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
        handle: AttrHandle,
        value: Bytes,
        write_type: WriteType,
    ) -> Result<()> {
        let mut state = self
            .submit(RadioRequest::Write {
                slot,
                conn_id,
                handle,
                value: value.clone(),
                write_type,
            })
            .await?;
        if !state.auto_respond {
            return Ok(());
        }

        let link = state.link(conn_id)?;
        let Some(fixture) = state.fixtures.get_mut(&link.address) else {
            return Err(RadioError::UnknownConnection { conn_id: conn_id.0 });
        };
        match CommandFrame::parse(&value).and_then(|f| LightCommand::try_from(&f)) {
            Ok(LightCommand::Power { on }) => fixture.power = on,
            Ok(command) => trace!(%command, "fixture accepted command"),
            // Real fixtures silently drop malformed frames.
            Err(e) => debug!(error = %e, "fixture ignored malformed frame"),
        }
        if link.notifying {
            let power = fixture.power;
            self.emit(status_notification(link.slot, power))?;
        }
        Ok(())
    }

    async fn write_descriptor(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
        handle: AttrHandle,
        value: Bytes,
    ) -> Result<()> {
        let mut state = self
            .submit(RadioRequest::WriteDescriptor {
                slot,
                conn_id,
                handle,
                value: value.clone(),
            })
            .await?;
        if !state.auto_respond {
            return Ok(());
        }
        let notifying = value.as_ref() == CCCD_ENABLE_NOTIFY;
        match state.links.get_mut(&conn_id) {
            Some(link) => link.notifying = notifying,
            None => return Err(RadioError::UnknownConnection { conn_id: conn_id.0 }),
        }
        self.emit(RadioEvent::DescriptorWritten {
            slot,
            status: GattStatus::Success,
        })
    }

    async fn set_tx_power(&self, dbm: i8) -> Result<()> {
        let mut state = self.submit(RadioRequest::SetTxPower { dbm }).await?;
        state.tx_power = dbm;
        Ok(())
    }

    async fn set_local_mtu(&self, mtu: u16) -> Result<()> {
        let mut state = self.submit(RadioRequest::SetLocalMtu { mtu }).await?;
        state.local_mtu = mtu;
        Ok(())
    }
}

fn status_notification(slot: SlotId, power: bool) -> RadioEvent {
    let data = vec![
        FRAME_HEADER,
        STATUS_OPCODE,
        0x07,
        u8::from(power),
        0x00,
        0x00,
        0x00,
    ];
    RadioEvent::Notification {
        slot,
        handle: NOTIFY_CHAR_HANDLE,
        data: Bytes::from(data),
    }
}

/// Handle for scripting and inspecting a [`MockRadio`].
#[derive(Debug, Clone)]
pub struct MockRadioHandle {
    state: Arc<Mutex<MockState>>,
    events: RadioEventSender,
}

impl MockRadioHandle {
    /// Answer requests like real fixtures would.
    pub async fn set_auto_respond(&self, enabled: bool) {
        self.state.lock().await.auto_respond = enabled;
    }

    pub async fn add_fixture(&self, fixture: Fixture) {
        self.state
            .lock()
            .await
            .fixtures
            .insert(fixture.address, fixture);
    }

    pub async fn remove_fixture(&self, address: MacAddress) -> Option<Fixture> {
        self.state.lock().await.fixtures.remove(&address)
    }

    pub async fn fixture(&self, address: MacAddress) -> Option<Fixture> {
        self.state.lock().await.fixtures.get(&address).cloned()
    }

    /// Fail the next request of `kind`.
    pub async fn fail_next(&self, kind: RequestKind) {
        self.fail_times(kind, 1).await;
    }

    /// Fail the next `times` requests of `kind`.
    pub async fn fail_times(&self, kind: RequestKind, times: usize) {
        *self.state.lock().await.failures.entry(kind).or_default() += times;
    }

    /// Every request received so far, oldest first.
    pub async fn requests(&self) -> Vec<RadioRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Requests of one kind.
    pub async fn requests_of(&self, kind: RequestKind) -> Vec<RadioRequest> {
        self.state
            .lock()
            .await
            .requests
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }

    pub async fn clear_requests(&self) {
        self.state.lock().await.requests.clear();
    }

    /// Push an event to the engine as if the stack produced it.
    pub fn emit(&self, event: RadioEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| RadioError::ChannelClosed)
    }

    /// Simulate a fixture dropping its link.
    pub async fn drop_link(&self, address: MacAddress) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some((&conn_id, &link)) = state.links.iter().find(|(_, l)| l.address == address)
        else {
            return Err(RadioError::rejected("drop_link", format!("{address} has no link")));
        };
        state.links.remove(&conn_id);
        self.emit(RadioEvent::Disconnected {
            slot: link.slot,
            reason: REASON_TIMEOUT,
        })
    }

    /// Simulate a fixture pushing a status notification.
    pub async fn notify_power(&self, address: MacAddress, on: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(link) = state.links.values().find(|l| l.address == address).copied() else {
            return Err(RadioError::rejected("notify", format!("{address} has no link")));
        };
        if let Some(fixture) = state.fixtures.get_mut(&address) {
            fixture.power = on;
        }
        self.emit(status_notification(link.slot, on))
    }

    pub async fn is_scanning(&self) -> bool {
        self.state.lock().await.scanning
    }

    pub async fn tx_power(&self) -> i8 {
        self.state.lock().await.tx_power
    }

    pub async fn local_mtu(&self) -> u16 {
        self.state.lock().await.local_mtu
    }

    /// Number of open simulated links.
    pub async fn link_count(&self) -> usize {
        self.state.lock().await.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> MacAddress {
        MacAddress::new([0xAA, 0xBB, 0xCC, 0x00, 0x00, last])
    }

    fn slot(index: usize) -> SlotId {
        SlotId::new(index).unwrap()
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let (radio, handle, _events) = MockRadio::new();
        radio.set_tx_power(3).await.unwrap();
        radio.stop_scan().await.unwrap();

        assert_eq!(
            handle.requests().await,
            vec![RadioRequest::SetTxPower { dbm: 3 }, RadioRequest::StopScan]
        );
        assert_eq!(handle.tx_power().await, 3);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let (radio, handle, _events) = MockRadio::new();
        handle.fail_next(RequestKind::Register).await;

        assert!(radio.register_client(slot(0)).await.is_err());
        assert!(radio.register_client(slot(0)).await.is_ok());
        assert_eq!(handle.requests_of(RequestKind::Register).await.len(), 2);
    }

    #[tokio::test]
    async fn test_manual_mode_emits_nothing() {
        let (radio, _handle, mut events) = MockRadio::new();
        radio.register_client(slot(0)).await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_requires_registration() {
        let (radio, _handle, _events) = MockRadio::new();
        let err = radio.open(slot(1), addr(1)).await.unwrap_err();
        assert_eq!(err, RadioError::NotRegistered { slot: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_scan_advertises_then_completes() {
        let (radio, handle, mut events) = MockRadio::new();
        handle.set_auto_respond(true).await;
        handle.add_fixture(Fixture::floodlight(addr(2), "Flood Light")).await;
        handle.add_fixture(Fixture::floodlight(addr(1), "Flood Light")).await;

        radio.start_scan(Duration::from_secs(15)).await.unwrap();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert!(matches!(first, RadioEvent::ScanResult(ref a) if a.address == addr(1)));
        assert!(matches!(second, RadioEvent::ScanResult(ref a) if a.address == addr(2)));
        assert_eq!(events.recv().await.unwrap(), RadioEvent::ScanComplete);
        assert!(!handle.is_scanning().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_scan_does_not_complete() {
        let (radio, handle, mut events) = MockRadio::new();
        handle.set_auto_respond(true).await;

        radio.start_scan(Duration::from_secs(1)).await.unwrap();
        radio.stop_scan().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_auto_link_and_resolution() {
        let (radio, handle, mut events) = MockRadio::new();
        handle.set_auto_respond(true).await;
        handle.add_fixture(Fixture::floodlight(addr(1), "Flood Light")).await;

        radio.register_client(slot(0)).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            RadioEvent::Registered {
                status: GattStatus::Success,
                ..
            }
        ));

        radio.open(slot(0), addr(1)).await.unwrap();
        let RadioEvent::Opened {
            conn_id, status, ..
        } = events.recv().await.unwrap()
        else {
            panic!("expected Opened");
        };
        assert!(status.is_success());

        radio.search_services(slot(0), conn_id, Some(Uuid16(SERVICE_UUID))).await.unwrap();
        let RadioEvent::ServiceFound { range, .. } = events.recv().await.unwrap() else {
            panic!("expected ServiceFound");
        };
        assert!(matches!(
            events.recv().await.unwrap(),
            RadioEvent::SearchComplete { .. }
        ));

        assert_eq!(radio.characteristic_count(slot(0), conn_id, range).await.unwrap(), 2);
        let write = radio
            .characteristic_by_uuid(slot(0), conn_id, range, Uuid16(WRITE_CHAR_UUID))
            .await
            .unwrap()
            .unwrap();
        assert!(write.properties.is_writable());

        let notify = radio
            .characteristic_by_uuid(slot(0), conn_id, range, Uuid16(NOTIFY_CHAR_UUID))
            .await
            .unwrap()
            .unwrap();
        let cccd = radio
            .descriptor_by_uuid(slot(0), conn_id, notify.handle, Uuid16(CCCD_UUID))
            .await
            .unwrap();
        assert!(cccd.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_fixture_fails_open() {
        let (radio, handle, mut events) = MockRadio::new();
        handle.set_auto_respond(true).await;
        handle
            .add_fixture(Fixture::floodlight(addr(1), "Flood Light").unreachable())
            .await;

        radio.register_client(slot(0)).await.unwrap();
        let _ = events.recv().await;
        radio.open(slot(0), addr(1)).await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            RadioEvent::Opened {
                status: GattStatus::Failed(STATUS_CONN_FAILED),
                ..
            }
        ));
        assert_eq!(handle.link_count().await, 0);
    }

    #[tokio::test]
    async fn test_power_write_updates_fixture_and_notifies() {
        let (radio, handle, mut events) = MockRadio::new();
        handle.set_auto_respond(true).await;
        handle.add_fixture(Fixture::floodlight(addr(1), "Flood Light")).await;

        radio.register_client(slot(0)).await.unwrap();
        radio.open(slot(0), addr(1)).await.unwrap();
        let _ = events.recv().await;
        let Some(RadioEvent::Opened { conn_id, .. }) = events.recv().await else {
            panic!("expected Opened");
        };

        radio
            .write_descriptor(
                slot(0),
                conn_id,
                CCCD_HANDLE,
                Bytes::from_static(&CCCD_ENABLE_NOTIFY),
            )
            .await
            .unwrap();
        let _ = events.recv().await;

        let frame = LightCommand::power(true).to_frame().unwrap();
        radio
            .write_characteristic(
                slot(0),
                conn_id,
                WRITE_CHAR_HANDLE,
                frame.to_bytes(),
                WriteType::WithoutResponse,
            )
            .await
            .unwrap();

        assert!(handle.fixture(addr(1)).await.unwrap().power);
        let RadioEvent::Notification { data, .. } = events.recv().await.unwrap() else {
            panic!("expected Notification");
        };
        assert_eq!(data[3], 0x01);
        assert_eq!(data.len(), 7);
    }

    #[tokio::test]
    async fn test_drop_link_emits_disconnect() {
        let (radio, handle, mut events) = MockRadio::new();
        handle.set_auto_respond(true).await;
        handle.add_fixture(Fixture::floodlight(addr(1), "Flood Light")).await;
        radio.register_client(slot(2)).await.unwrap();
        radio.open(slot(2), addr(1)).await.unwrap();
        let _ = events.recv().await;
        let _ = events.recv().await;

        handle.drop_link(addr(1)).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            RadioEvent::Disconnected {
                slot: slot(2),
                reason: REASON_TIMEOUT
            }
        );
        assert!(handle.drop_link(addr(1)).await.is_err());
    }
}
