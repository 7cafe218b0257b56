//! The radio stack contract.
//!
//! Methods return `impl Future + Send` rather than using bare `async fn`, so
//! engine code that is generic over the stack can still be spawned onto the
//! multi-threaded runtime. Implementations are free to write `async fn`.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use floodhub_core::{AttrHandle, ConnectionId, MacAddress, SlotId, Uuid16};

use crate::error::Result;
use crate::types::{CharacteristicInfo, DescriptorInfo, ServiceRange, WriteType};

/// Central/client capability of a Bluetooth LE stack.
///
/// Unless stated otherwise a method only submits a request; its outcome is
/// reported later as a [`RadioEvent`](crate::RadioEvent).
pub trait RadioStack: Send + Sync + 'static {
    /// Scan for `duration`. Completion: `ScanResult`s, then `ScanComplete`.
    fn start_scan(&self, duration: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Stop an ongoing scan. No `ScanComplete` follows.
    fn stop_scan(&self) -> impl Future<Output = Result<()>> + Send;

    /// Register a client profile whose id is `slot`. Completion: `Registered`.
    fn register_client(&self, slot: SlotId) -> impl Future<Output = Result<()>> + Send;

    /// Release the client profile for `slot`. Completes immediately.
    fn unregister_client(&self, slot: SlotId) -> impl Future<Output = Result<()>> + Send;

    /// Open a link to `address`. Completion: `Opened`.
    fn open(&self, slot: SlotId, address: MacAddress)
    -> impl Future<Output = Result<()>> + Send;

    /// Close a link. Completion: `Disconnected`.
    fn close(&self, slot: SlotId, conn_id: ConnectionId)
    -> impl Future<Output = Result<()>> + Send;

    /// Start the MTU exchange. Completion: `MtuConfigured`.
    fn request_mtu(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Search for services, or for one service when `filter` is set.
    /// Completion: zero or more `ServiceFound`, then `SearchComplete`.
    fn search_services(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
        filter: Option<Uuid16>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Number of characteristics cached in `range`. Answers directly.
    fn characteristic_count(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
        range: ServiceRange,
    ) -> impl Future<Output = Result<u16>> + Send;

    /// Cached characteristic with `uuid` in `range`. Answers directly.
    fn characteristic_by_uuid(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
        range: ServiceRange,
        uuid: Uuid16,
    ) -> impl Future<Output = Result<Option<CharacteristicInfo>>> + Send;

    /// Cached descriptor with `uuid` under `characteristic`. Answers directly.
    fn descriptor_by_uuid(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
        characteristic: AttrHandle,
        uuid: Uuid16,
    ) -> impl Future<Output = Result<Option<DescriptorInfo>>> + Send;

    /// Route notifications from `handle` to this client.
    /// Completion: `NotifyRegistered`.
    fn register_for_notify(
        &self,
        slot: SlotId,
        address: MacAddress,
        handle: AttrHandle,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write a characteristic value. For `WithoutResponse` the returned result
    /// is the only acknowledgement.
    fn write_characteristic(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
        handle: AttrHandle,
        value: Bytes,
        write_type: WriteType,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write a descriptor value. Completion: `DescriptorWritten`.
    fn write_descriptor(
        &self,
        slot: SlotId,
        conn_id: ConnectionId,
        handle: AttrHandle,
        value: Bytes,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Set transmit power in dBm. Completes immediately.
    fn set_tx_power(&self, dbm: i8) -> impl Future<Output = Result<()>> + Send;

    /// Set the MTU offered in exchanges. Completes immediately.
    fn set_local_mtu(&self, mtu: u16) -> impl Future<Output = Result<()>> + Send;
}
