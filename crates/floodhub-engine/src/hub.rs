//! The hub task and its cloneable handle.
//!
//! [`Hub::spawn`] moves a [`DeviceManager`] onto its own task. Radio events,
//! timer events and requests from any number of [`HubHandle`]s are merged
//! there, so the registry has exactly one writer.

use floodhub_core::{Error, MacAddress, Result};
use floodhub_protocol::LightCommand;
use floodhub_radio::{RadioEventReceiver, RadioStack};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{ConfigUpdate, HubConfig};
use crate::manager::{
    ControlOutcome, DeviceManager, DeviceSnapshot, HubMetrics, TimerReceiver,
};
use crate::observer::HubCallbacks;
use crate::store::ConfigStore;

/// Requests queued ahead of the hub task before callers wait.
const REQUEST_QUEUE_SIZE: usize = 32;

type Reply<T> = oneshot::Sender<T>;
type CallbackEdit = Box<dyn FnOnce(&mut HubCallbacks) + Send>;

enum Request {
    StartScan(Reply<Result<()>>),
    StopScan(Reply<Result<()>>),
    Command {
        address: MacAddress,
        command: LightCommand,
        reply: Reply<Result<ControlOutcome>>,
    },
    Connect {
        address: MacAddress,
        reply: Reply<Result<()>>,
    },
    Disconnect {
        address: MacAddress,
        reply: Reply<Result<()>>,
    },
    ResetDeviceList(Reply<Result<()>>),
    Config(Reply<HubConfig>),
    UpdateConfig {
        update: ConfigUpdate,
        reply: Reply<Result<HubConfig>>,
    },
    Metrics(Reply<HubMetrics>),
    Devices(Reply<Vec<DeviceSnapshot>>),
    UpdateCallbacks(CallbackEdit),
    Shutdown(Reply<()>),
}

pub struct Hub;

impl Hub {
    /// Start the hub task.
    ///
    /// The task applies radio settings, starts scanning, and then serves
    /// events and requests until [`HubHandle::shutdown`] is called or every
    /// handle is dropped.
    ///
    /// # Errors
    /// Returns `Error::Config` if `config` does not validate.
    pub fn spawn<R: RadioStack>(
        radio: R,
        events: RadioEventReceiver,
        config: HubConfig,
        store: Box<dyn ConfigStore>,
        callbacks: HubCallbacks,
    ) -> Result<HubHandle> {
        let (manager, timers) = DeviceManager::new(radio, config, store, callbacks)?;
        let (requests, request_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        tokio::spawn(run(manager, request_rx, events, timers));
        Ok(HubHandle { requests })
    }
}

async fn run<R: RadioStack>(
    mut manager: DeviceManager<R>,
    mut requests: mpsc::Receiver<Request>,
    mut events: RadioEventReceiver,
    mut timers: TimerReceiver,
) {
    if let Err(e) = manager.start().await {
        warn!("Initial scan failed: {}", e);
    }

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(Request::Shutdown(reply)) => {
                    manager.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                Some(request) => serve(&mut manager, request).await,
                None => {
                    debug!("All hub handles dropped");
                    manager.shutdown().await;
                    break;
                }
            },
            Some(event) = events.recv() => manager.handle_radio_event(event).await,
            Some(timer) = timers.recv() => manager.handle_timer(timer).await,
        }
    }
    info!("Hub stopped");
}

async fn serve<R: RadioStack>(manager: &mut DeviceManager<R>, request: Request) {
    // A caller that gave up waiting is not an error for the hub.
    match request {
        Request::StartScan(reply) => {
            let _ = reply.send(manager.start_scan().await);
        }
        Request::StopScan(reply) => {
            let _ = reply.send(manager.stop_scan().await);
        }
        Request::Command {
            address,
            command,
            reply,
        } => {
            let _ = reply.send(manager.send_command(address, command).await);
        }
        Request::Connect { address, reply } => {
            let _ = reply.send(manager.connect(address).await);
        }
        Request::Disconnect { address, reply } => {
            let _ = reply.send(manager.disconnect(address).await);
        }
        Request::ResetDeviceList(reply) => {
            let _ = reply.send(manager.reset_device_list().await);
        }
        Request::Config(reply) => {
            let _ = reply.send(manager.config().clone());
        }
        Request::UpdateConfig { update, reply } => {
            let _ = reply.send(manager.update_config(update).await);
        }
        Request::Metrics(reply) => {
            let _ = reply.send(manager.metrics());
        }
        Request::Devices(reply) => {
            let _ = reply.send(manager.devices());
        }
        Request::UpdateCallbacks(edit) => edit(manager.callbacks_mut()),
        Request::Shutdown(reply) => {
            let _ = reply.send(());
        }
    }
}

/// Cloneable handle to a running hub.
///
/// Every method fails with `Error::HubStopped` once the hub task is gone.
#[derive(Debug, Clone)]
pub struct HubHandle {
    requests: mpsc::Sender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Request::StartScan(_) => "StartScan",
            Request::StopScan(_) => "StopScan",
            Request::Command { .. } => "Command",
            Request::Connect { .. } => "Connect",
            Request::Disconnect { .. } => "Disconnect",
            Request::ResetDeviceList(_) => "ResetDeviceList",
            Request::Config(_) => "Config",
            Request::UpdateConfig { .. } => "UpdateConfig",
            Request::Metrics(_) => "Metrics",
            Request::Devices(_) => "Devices",
            Request::UpdateCallbacks(_) => "UpdateCallbacks",
            Request::Shutdown(_) => "Shutdown",
        };
        f.write_str(name)
    }
}

impl HubHandle {
    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| Error::HubStopped)?;
        response.await.map_err(|_| Error::HubStopped)
    }

    pub async fn start_scan(&self) -> Result<()> {
        self.call(Request::StartScan).await?
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.call(Request::StopScan).await?
    }

    pub async fn set_power(&self, address: MacAddress, on: bool) -> Result<ControlOutcome> {
        self.send_command(address, LightCommand::power(on)).await
    }

    pub async fn set_brightness(&self, address: MacAddress, level: u8) -> Result<ControlOutcome> {
        self.send_command(address, LightCommand::brightness(level)).await
    }

    pub async fn set_color(
        &self,
        address: MacAddress,
        r: u8,
        g: u8,
        b: u8,
    ) -> Result<ControlOutcome> {
        self.send_command(address, LightCommand::color(r, g, b)).await
    }

    pub async fn send_command(
        &self,
        address: MacAddress,
        command: LightCommand,
    ) -> Result<ControlOutcome> {
        self.call(|reply| Request::Command {
            address,
            command,
            reply,
        })
        .await?
    }

    pub async fn connect(&self, address: MacAddress) -> Result<()> {
        self.call(|reply| Request::Connect { address, reply }).await?
    }

    pub async fn disconnect(&self, address: MacAddress) -> Result<()> {
        self.call(|reply| Request::Disconnect { address, reply }).await?
    }

    pub async fn reset_device_list(&self) -> Result<()> {
        self.call(Request::ResetDeviceList).await?
    }

    pub async fn config(&self) -> Result<HubConfig> {
        self.call(Request::Config).await
    }

    pub async fn update_config(&self, update: ConfigUpdate) -> Result<HubConfig> {
        self.call(|reply| Request::UpdateConfig { update, reply }).await?
    }

    pub async fn metrics(&self) -> Result<HubMetrics> {
        self.call(Request::Metrics).await
    }

    pub async fn devices(&self) -> Result<Vec<DeviceSnapshot>> {
        self.call(Request::Devices).await
    }

    /// Change registered callbacks on the running hub. Callbacks the edit
    /// does not touch stay as they are.
    pub async fn update_callbacks(
        &self,
        edit: impl FnOnce(HubCallbacks) -> HubCallbacks + Send + 'static,
    ) -> Result<()> {
        let edit: CallbackEdit = Box::new(move |callbacks: &mut HubCallbacks| {
            *callbacks = edit(std::mem::take(callbacks));
        });
        self.requests
            .send(Request::UpdateCallbacks(edit))
            .await
            .map_err(|_| Error::HubStopped)
    }

    /// Stop scanning, close every link and end the hub task.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(Request::Shutdown).await
    }

    /// Whether the hub task is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.requests.is_closed()
    }
}
