//! End-to-end flows through the hub task against simulated fixtures.

use std::time::Duration;

use floodhub_core::{Error, MacAddress, constants::DEFAULT_DEVICE_NAME};
use floodhub_engine::{
    ConfigUpdate, ControlOutcome, Hub, HubCallbacks, HubConfig, HubHandle, JsonFileStore,
    LinkState, MemoryStore,
};
use floodhub_radio::mock::{Fixture, MockRadio, MockRadioHandle, RequestKind};
use tempfile::TempDir;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Found(usize, MacAddress),
    AllFound,
    Connected(usize),
    Disconnected(usize),
    Power(MacAddress, bool),
}

fn addr(last: u8) -> MacAddress {
    MacAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, last])
}

fn observing() -> (HubCallbacks, mpsc::UnboundedReceiver<Seen>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (found, all, up, down, power) = (tx.clone(), tx.clone(), tx.clone(), tx.clone(), tx);
    let callbacks = HubCallbacks::new()
        .on_device_found(move |slot, address, _| {
            let _ = found.send(Seen::Found(slot.index(), address));
        })
        .on_all_devices_found(move || {
            let _ = all.send(Seen::AllFound);
        })
        .on_device_connected(move |slot| {
            let _ = up.send(Seen::Connected(slot.index()));
        })
        .on_device_disconnected(move |slot| {
            let _ = down.send(Seen::Disconnected(slot.index()));
        })
        .on_power_changed(move |address, on| {
            let _ = power.send(Seen::Power(address, on));
        });
    (callbacks, rx)
}

async fn start_hub(
    fixtures: Vec<Fixture>,
    callbacks: HubCallbacks,
) -> (HubHandle, MockRadioHandle) {
    let (radio, mock, events) = MockRadio::new();
    mock.set_auto_respond(true).await;
    for fixture in fixtures {
        mock.add_fixture(fixture).await;
    }
    let hub = Hub::spawn(
        radio,
        events,
        HubConfig::default(),
        Box::new(MemoryStore::new()),
        callbacks,
    )
    .unwrap();
    (hub, mock)
}

async fn wait_for(rx: &mut mpsc::UnboundedReceiver<Seen>, wanted: Seen) -> Vec<Seen> {
    let mut seen = Vec::new();
    loop {
        let event = rx.recv().await.expect("hub dropped its callbacks");
        seen.push(event.clone());
        if event == wanted {
            return seen;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_discovers_up_to_capacity_then_stops() {
    let fixtures = (1..=4)
        .map(|i| Fixture::floodlight(addr(i), DEFAULT_DEVICE_NAME))
        .collect();
    let (callbacks, mut rx) = observing();
    let (hub, mock) = start_hub(fixtures, callbacks).await;

    let seen = wait_for(&mut rx, Seen::AllFound).await;
    assert_eq!(
        seen,
        vec![
            Seen::Found(0, addr(1)),
            Seen::Found(1, addr(2)),
            Seen::Found(2, addr(3)),
            Seen::AllFound,
        ]
    );

    let metrics = hub.metrics().await.unwrap();
    assert_eq!(metrics.discovered_count, 3);
    assert_eq!(metrics.connected_count, 0);
    assert!(!mock.is_scanning().await);

    // No rescans once every slot is filled.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.requests_of(RequestKind::StartScan).await.len(), 1);
    assert!(hub.devices().await.unwrap().iter().all(|d| d.address != addr(4)));

    hub.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_queued_command_reaches_fixture() {
    let (callbacks, mut rx) = observing();
    let (hub, mock) = start_hub(
        vec![Fixture::floodlight(addr(1), DEFAULT_DEVICE_NAME)],
        callbacks,
    )
    .await;
    wait_for(&mut rx, Seen::Found(0, addr(1))).await;

    let outcome = hub.set_power(addr(1), true).await.unwrap();
    assert_eq!(outcome, ControlOutcome::Queued);

    let seen = wait_for(&mut rx, Seen::Power(addr(1), true)).await;
    assert_eq!(seen.first(), Some(&Seen::Connected(0)));
    assert!(mock.fixture(addr(1)).await.unwrap().power);
    assert_eq!(mock.requests_of(RequestKind::Write).await.len(), 1);

    let devices = hub.devices().await.unwrap();
    assert_eq!(devices[0].state, LinkState::Ready);
    assert_eq!(devices[0].power, Some(true));
    assert!(!devices[0].pending);

    // Now the link is ready, commands go straight out.
    let outcome = hub.set_brightness(addr(1), 55).await.unwrap();
    assert_eq!(outcome, ControlOutcome::Sent);

    hub.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dropped_link_reconnects_on_demand() {
    let (callbacks, mut rx) = observing();
    let (hub, mock) = start_hub(
        vec![Fixture::floodlight(addr(7), DEFAULT_DEVICE_NAME)],
        callbacks,
    )
    .await;
    wait_for(&mut rx, Seen::Found(0, addr(7))).await;

    hub.connect(addr(7)).await.unwrap();
    wait_for(&mut rx, Seen::Connected(0)).await;

    mock.drop_link(addr(7)).await.unwrap();
    wait_for(&mut rx, Seen::Disconnected(0)).await;
    assert_eq!(hub.metrics().await.unwrap().connected_count, 0);

    hub.set_color(addr(7), 1, 2, 3).await.unwrap();
    wait_for(&mut rx, Seen::Connected(0)).await;
    // The queued color is written and echoed back with the power state.
    wait_for(&mut rx, Seen::Power(addr(7), false)).await;

    hub.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_callbacks_can_be_added_while_running() {
    let (found_tx, mut found_rx) = mpsc::unbounded_channel();
    let callbacks = HubCallbacks::new().on_device_found(move |_, address, _| {
        let _ = found_tx.send(address);
    });
    let (hub, mock) = start_hub(Vec::new(), callbacks).await;

    let (power_tx, mut power_rx) = mpsc::unbounded_channel();
    hub.update_callbacks(move |callbacks| {
        callbacks.on_power_changed(move |address, on| {
            let _ = power_tx.send((address, on));
        })
    })
    .await
    .unwrap();

    // Picked up by the next periodic scan.
    mock.add_fixture(Fixture::floodlight(addr(3), DEFAULT_DEVICE_NAME))
        .await;
    assert_eq!(found_rx.recv().await, Some(addr(3)));

    hub.connect(addr(3)).await.unwrap();
    hub.set_power(addr(3), true).await.unwrap();
    assert_eq!(power_rx.recv().await, Some((addr(3), true)));

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_fixture_and_stopped_hub() {
    let (hub, _mock) = start_hub(Vec::new(), HubCallbacks::new()).await;

    let err = hub.set_power(addr(9), true).await.unwrap_err();
    assert!(matches!(err, Error::DeviceNotFound(_)));

    hub.shutdown().await.unwrap();
    assert!(matches!(hub.metrics().await, Err(Error::HubStopped)));
    assert!(!hub.is_running());
}

#[tokio::test]
async fn test_config_persists_across_restarts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("floodhub.json");

    let mut store = JsonFileStore::open(&path).unwrap();
    let config = HubConfig::load(&mut store).unwrap();
    assert_eq!(config, HubConfig::default());

    let (radio, mock, events) = MockRadio::new();
    let hub = Hub::spawn(radio, events, config, Box::new(store), HubCallbacks::new()).unwrap();
    let updated = hub
        .update_config(ConfigUpdate {
            device_name: Some("Backyard".into()),
            by_uuid: Some(true),
            local_mtu: Some(185),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.filter.name.as_str(), "Backyard");
    assert_eq!(mock.local_mtu().await, 185);
    hub.shutdown().await.unwrap();

    let mut store = JsonFileStore::open(&path).unwrap();
    let reloaded = HubConfig::load(&mut store).unwrap();
    assert_eq!(reloaded, updated);
}
