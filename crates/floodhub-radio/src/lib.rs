//! Radio abstraction for the floodhub gateway.
//!
//! The gateway drives fixtures through a Bluetooth LE central/client stack
//! supplied by the platform. This crate defines the slice of that stack the
//! engine needs, in terms of requests and completion events:
//!
//! - **Requests** go through the [`RadioStack`] trait. Every request is
//!   non-blocking: `Ok(())` means the stack accepted it, not that it finished.
//! - **Completions** arrive later as [`RadioEvent`]s on an unbounded channel,
//!   tagged with the [`SlotId`](floodhub_core::SlotId) the request was issued
//!   for, so the engine can route them with an index lookup.
//!
//! Attribute lookups (`characteristic_count`, `characteristic_by_uuid`,
//! `descriptor_by_uuid`) read the stack's local GATT cache and answer
//! directly.
//!
//! # Mock Radio
//!
//! With the default `mock` feature the crate ships [`mock::MockRadio`], an
//! in-process stack that records every request, can be told to fail specific
//! requests, and optionally answers like real fixtures.
//!
//! ```
//! use floodhub_radio::mock::{Fixture, MockRadio};
//! use floodhub_radio::{RadioEvent, RadioStack};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> floodhub_radio::Result<()> {
//!     let (radio, handle, mut events) = MockRadio::new();
//!     handle.set_auto_respond(true).await;
//!     handle
//!         .add_fixture(Fixture::floodlight("AA:BB:CC:00:00:01".parse().unwrap(), "Flood Light"))
//!         .await;
//!
//!     radio.start_scan(Duration::from_secs(15)).await?;
//!     let event = events.recv().await.unwrap();
//!     assert!(matches!(event, RadioEvent::ScanResult(_)));
//!     Ok(())
//! }
//! ```

pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod traits;
pub mod types;

pub use error::{RadioError, Result};
pub use traits::RadioStack;
pub use types::{
    Advertisement, CharProperties, CharacteristicInfo, DescriptorInfo, GattStatus, RadioEvent,
    RadioEventReceiver, RadioEventSender, ServiceRange, WriteType,
};
