//! Discovery and control engine for floodlight fixtures.
//!
//! The engine finds fixtures with a [`RadioStack`](floodhub_radio::RadioStack),
//! walks each one through its link lifecycle, and writes light commands to
//! it, queueing commands that arrive before the link is ready.
//!
//! - [`config`]: runtime configuration and target filter
//! - [`store`]: persistent configuration storage
//! - [`registry`]: fixed-capacity fixture registry
//! - [`connection`]: per-fixture link state machine
//! - [`scan`]: scan scheduling
//! - [`observer`]: callbacks toward the upstream bridge
//! - [`manager`]: the state machine driver and control operations
//! - [`hub`]: single-owner task and its cloneable handle
//!
//! # Examples
//!
//! ```
//! use floodhub_engine::{Hub, HubCallbacks, HubConfig, MemoryStore};
//! use floodhub_radio::mock::{Fixture, MockRadio};
//!
//! #[tokio::main]
//! async fn main() -> floodhub_core::Result<()> {
//!     let (radio, mock, events) = MockRadio::new();
//!     mock.set_auto_respond(true).await;
//!     let address = "AA:BB:CC:00:00:01".parse()?;
//!     mock.add_fixture(Fixture::floodlight(address, "Flood Light")).await;
//!
//!     let callbacks = HubCallbacks::new().on_device_found(|slot, address, name| {
//!         println!("{name} ({address}) in slot {slot}");
//!     });
//!     let hub = Hub::spawn(
//!         radio,
//!         events,
//!         HubConfig::default(),
//!         Box::new(MemoryStore::new()),
//!         callbacks,
//!     )?;
//!
//!     hub.set_power(address, true).await.ok();
//!     hub.shutdown().await
//! }
//! ```

pub mod config;
pub mod connection;
pub mod hub;
pub mod manager;
pub mod observer;
pub mod registry;
pub mod scan;
pub mod store;

pub use config::{ConfigUpdate, HubConfig, TargetFilter};
pub use connection::{LinkMachine, LinkState, StateTransition};
pub use hub::{Hub, HubHandle};
pub use manager::{
    ControlOutcome, DeviceManager, DeviceSnapshot, HubMetrics, TimerEvent, TimerReceiver,
    TimerSender,
};
pub use observer::HubCallbacks;
pub use registry::{DeviceRecord, DeviceRegistry, PendingCommand};
pub use scan::{ScanController, ScanState};
pub use store::{ConfigKey, ConfigStore, ConfigValue, JsonFileStore, MemoryStore};
