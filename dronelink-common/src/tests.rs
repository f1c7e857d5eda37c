use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::api::BDAddr;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::timeout;
use uuid::Uuid;

use crate::adapter::{ConnectionAdapter, LinkStatus};
use crate::btle::found_device;
use crate::config::AdapterConfig;
use crate::constants::{CONTROL_CHARACTERISTIC_UUID, CONTROL_SERVICE_UUID, DEVICE_NAME_PREFIX};
use crate::controller::{ControllerData, Stick};
use crate::error::{LinkError, Result};
use crate::logger::{tail_lines, Logger};
use crate::transport::{DeviceFilter, DisconnectEvents, Transport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    RequestDevice,
    ConnectGatt,
    PrimaryService,
    Characteristic,
}

#[derive(Default)]
struct MockState {
    filters: Vec<DeviceFilter>,
    fail_at: Option<Step>,
    fail_writes: bool,
    server_connected: bool,
    disconnects: usize,
    writes: Vec<Vec<u8>>,
    links: Vec<UnboundedSender<()>>,
    next_device: u32,
    drop_on_subscribe: bool,
    requests_in_flight: usize,
    max_requests_in_flight: usize,
}

#[derive(Clone, Default)]
struct MockTransport {
    state: Arc<Mutex<MockState>>,
    gate: Option<Arc<Notify>>,
}

impl MockTransport {
    fn failing_at(step: Step) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().fail_at = Some(step);
        transport
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn check(&self, step: Step) -> Result<()> {
        match self.state().fail_at {
            Some(failing) if failing == step => Err(LinkError::GattConnect(format!(
                "{step:?} refused by test"
            ))),
            _ => Ok(()),
        }
    }

    /// Link drop seen by the platform for the `index`th connection
    fn drop_link(&self, index: usize) {
        let mut state = self.state();
        state.server_connected = false;
        state.links[index].unbounded_send(()).unwrap();
    }
}

impl Transport for MockTransport {
    type Device = u32;
    type Server = u32;
    type Service = Uuid;
    type Characteristic = Uuid;

    async fn request_device(&self, filter: &DeviceFilter) -> Result<u32> {
        {
            let mut state = self.state();
            state.requests_in_flight += 1;
            state.max_requests_in_flight =
                state.max_requests_in_flight.max(state.requests_in_flight);
        }

        if let Some(gate) = self.gate.clone() {
            gate.notified().await;
        }

        self.state().requests_in_flight -= 1;
        self.check(Step::RequestDevice)?;

        let mut state = self.state();
        state.filters.push(filter.clone());
        state.next_device += 1;
        Ok(state.next_device)
    }

    async fn connect_gatt(&self, device: &u32) -> Result<u32> {
        self.check(Step::ConnectGatt)?;
        self.state().server_connected = true;
        Ok(*device)
    }

    async fn primary_service(&self, _server: &u32, uuid: Uuid) -> Result<Uuid> {
        self.check(Step::PrimaryService)?;
        Ok(uuid)
    }

    async fn characteristic(&self, _service: &Uuid, uuid: Uuid) -> Result<Uuid> {
        self.check(Step::Characteristic)?;
        Ok(uuid)
    }

    async fn write(&self, _characteristic: &Uuid, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(LinkError::Ble(btleplug::Error::NotConnected));
        }
        state.writes.push(bytes.to_vec());
        Ok(())
    }

    async fn is_connected(&self, _server: &u32) -> Result<bool> {
        Ok(self.state().server_connected)
    }

    async fn disconnect(&self, _server: &u32) -> Result<()> {
        let mut state = self.state();
        state.server_connected = false;
        state.disconnects += 1;
        // Platforms report explicit disconnects on the event channel too
        for link in &state.links {
            let _ = link.unbounded_send(());
        }
        Ok(())
    }

    async fn disconnect_events(&self, _device: &u32) -> Result<DisconnectEvents> {
        let (tx, rx) = unbounded();
        let mut state = self.state();
        if state.drop_on_subscribe {
            // Link already gone by the time the adapter starts watching it
            state.server_connected = false;
            tx.unbounded_send(()).unwrap();
        }
        state.links.push(tx);
        Ok(Box::pin(rx))
    }
}

fn adapter(transport: &MockTransport) -> ConnectionAdapter<MockTransport> {
    ConnectionAdapter::new(transport.clone(), &AdapterConfig::default())
}

fn sample() -> ControllerData {
    ControllerData::new(Stick::new(0.5, -1.0), Stick::new(0.0, 0.25))
        .with_button("b", false)
        .with_button("a", true)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn connect_success_sets_flags_and_handles() {
    let transport = MockTransport::default();
    let adapter = adapter(&transport);

    adapter.connect().await.unwrap();

    assert_eq!(
        adapter.status(),
        LinkStatus {
            is_connected: true,
            is_connecting: false,
            error: None,
        }
    );
    assert!(adapter.has_link().await);

    let state = transport.state();
    assert_eq!(
        state.filters,
        vec![DeviceFilter::new(DEVICE_NAME_PREFIX, vec![CONTROL_SERVICE_UUID])]
    );
}

#[tokio::test]
async fn connect_failure_reports_and_propagates() {
    for step in [
        Step::RequestDevice,
        Step::ConnectGatt,
        Step::PrimaryService,
        Step::Characteristic,
    ] {
        let transport = MockTransport::failing_at(step);
        let adapter = adapter(&transport);

        let err = adapter.connect().await.unwrap_err();

        assert!(err.to_string().contains(&format!("{step:?}")));
        assert!(!adapter.is_connecting());
        assert!(!adapter.is_connected());
        assert_eq!(adapter.error(), Some(err.to_string()));
        assert!(!adapter.has_link().await);
    }
}

#[tokio::test]
async fn failed_lookup_releases_opened_server() {
    let transport = MockTransport::failing_at(Step::Characteristic);
    let adapter = adapter(&transport);

    assert!(adapter.connect().await.is_err());

    let state = transport.state();
    assert_eq!(state.disconnects, 1);
    assert!(!state.server_connected);
}

#[tokio::test]
async fn failed_discovery_touches_nothing() {
    let transport = MockTransport::failing_at(Step::RequestDevice);
    let adapter = adapter(&transport);

    assert!(adapter.connect().await.is_err());
    assert_eq!(transport.state().disconnects, 0);
}

#[tokio::test]
async fn connect_clears_previous_error() {
    let transport = MockTransport::failing_at(Step::ConnectGatt);
    let adapter = adapter(&transport);

    assert!(adapter.connect().await.is_err());
    assert!(adapter.error().is_some());

    transport.state().fail_at = None;
    adapter.connect().await.unwrap();

    assert_eq!(adapter.error(), None);
    assert!(adapter.is_connected());
}

#[tokio::test]
async fn is_connecting_only_while_in_flight() {
    let gate = Arc::new(Notify::new());
    let transport = MockTransport {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let adapter = adapter(&transport);
    let mut status = adapter.subscribe();

    let pending = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.connect().await }
    });

    timeout(Duration::from_secs(1), status.wait_for(|s| s.is_connecting))
        .await
        .unwrap()
        .unwrap();
    assert!(!adapter.is_connected());

    gate.notify_one();
    pending.await.unwrap().unwrap();

    assert!(!adapter.is_connecting());
    assert!(adapter.is_connected());
}

#[tokio::test]
async fn disconnect_when_never_connected_is_noop() {
    let transport = MockTransport::default();
    let adapter = adapter(&transport);

    adapter.disconnect().await.unwrap();
    adapter.disconnect().await.unwrap();

    assert!(!adapter.is_connected());
    assert_eq!(transport.state().disconnects, 0);
}

#[tokio::test]
async fn disconnect_while_connected() {
    let transport = MockTransport::default();
    let adapter = adapter(&transport);

    adapter.connect().await.unwrap();
    adapter.disconnect().await.unwrap();
    settle().await;

    assert_eq!(transport.state().disconnects, 1);
    assert!(!adapter.has_link().await);
    assert_eq!(adapter.status(), LinkStatus::default());

    adapter.disconnect().await.unwrap();
    assert_eq!(transport.state().disconnects, 1);
}

#[tokio::test]
async fn send_without_link_fails_without_writing() {
    let transport = MockTransport::default();
    let adapter = adapter(&transport);

    let err = adapter.send_data(&sample()).await.unwrap_err();

    assert!(matches!(err, LinkError::NotConnected));
    assert!(transport.state().writes.is_empty());
}

#[tokio::test]
async fn send_writes_one_json_payload() {
    let transport = MockTransport::default();
    let adapter = adapter(&transport);
    let data = sample();

    adapter.connect().await.unwrap();
    adapter.send_data(&data).await.unwrap();

    let state = transport.state();
    assert_eq!(state.writes.len(), 1);

    let text = std::str::from_utf8(&state.writes[0]).unwrap();
    assert_eq!(
        text,
        r#"{"leftStick":{"x":0.5,"y":-1.0},"rightStick":{"x":0.0,"y":0.25},"buttons":{"a":true,"b":false}}"#
    );
    assert_eq!(ControllerData::from_payload(&state.writes[0]).unwrap(), data);
}

#[tokio::test]
async fn failed_write_is_reported() {
    let transport = MockTransport::default();
    let adapter = adapter(&transport);

    adapter.connect().await.unwrap();
    transport.state().fail_writes = true;

    assert!(adapter.send_data(&sample()).await.is_err());
    assert!(adapter.error().is_some());
    assert!(adapter.is_connected());
}

#[tokio::test]
async fn unexpected_disconnect_updates_status() {
    let transport = MockTransport::default();
    let adapter = adapter(&transport);
    let mut status = adapter.subscribe();

    adapter.connect().await.unwrap();
    transport.drop_link(0);

    timeout(Duration::from_secs(1), status.wait_for(|s| !s.is_connected))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(adapter.error(), Some(LinkError::Disconnected.to_string()));
    assert_eq!(adapter.error().as_deref(), Some("Device disconnected"));
    assert!(!adapter.has_link().await);
    assert!(matches!(
        adapter.send_data(&sample()).await,
        Err(LinkError::NotConnected)
    ));
}

#[tokio::test]
async fn stale_disconnect_is_ignored_after_reconnect() {
    let transport = MockTransport::default();
    let adapter = adapter(&transport);

    adapter.connect().await.unwrap();
    adapter.connect().await.unwrap();

    // The first link's observer may already be gone
    let _ = transport.state().links[0].unbounded_send(());
    settle().await;

    assert!(adapter.is_connected());
    assert_eq!(adapter.error(), None);
    assert!(adapter.has_link().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drop_right_after_connect_is_observed() {
    for _ in 0..50 {
        let transport = MockTransport::default();
        transport.state().drop_on_subscribe = true;
        let adapter = adapter(&transport);
        let mut status = adapter.subscribe();

        adapter.connect().await.unwrap();

        timeout(
            Duration::from_secs(1),
            status.wait_for(|s| !s.is_connected && s.error.is_some()),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(!adapter.has_link().await);
        assert_eq!(adapter.error(), Some(LinkError::Disconnected.to_string()));
    }
}

#[tokio::test]
async fn overlapping_connects_run_one_after_the_other() {
    let gate = Arc::new(Notify::new());
    let transport = MockTransport {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let adapter = adapter(&transport);

    let first = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.connect().await }
    });
    let second = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.connect().await }
    });

    timeout(Duration::from_secs(1), async {
        while !(first.is_finished() && second.is_finished()) {
            gate.notify_one();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let state = transport.state();
    assert_eq!(state.max_requests_in_flight, 1);
    assert_eq!(state.filters.len(), 2);
    drop(state);

    assert!(adapter.is_connected());
    assert!(adapter.has_link().await);
}

#[tokio::test]
async fn failed_reconnect_keeps_current_link() {
    let transport = MockTransport::default();
    let adapter = adapter(&transport);

    adapter.connect().await.unwrap();
    transport.state().fail_at = Some(Step::ConnectGatt);

    assert!(adapter.connect().await.is_err());

    assert!(adapter.has_link().await);
    assert!(adapter.is_connected());
    assert!(!adapter.is_connecting());
    assert!(adapter.error().is_some());

    adapter.send_data(&sample()).await.unwrap();
    assert_eq!(transport.state().writes.len(), 1);
}

#[test]
fn device_filter_matches_prefix_only() {
    let filter = DeviceFilter::new(DEVICE_NAME_PREFIX, vec![]);

    assert!(filter.matches("DroneController"));
    assert!(filter.matches("DroneController-42"));
    assert!(!filter.matches("dronecontroller"));
    assert!(!filter.matches("MyDroneController"));
}

#[test]
fn scan_lists_only_devices_connect_would_select() {
    let filter = DeviceFilter::new(DEVICE_NAME_PREFIX, vec![CONTROL_SERVICE_UUID]);
    let address = BDAddr::from([0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc]);

    let found = found_device(&filter, "DroneController-7".into(), address).unwrap();
    assert_eq!(found.name, "DroneController-7");
    assert_eq!(found.address, address.to_string());

    assert_eq!(found_device(&filter, "mydronecontroller".into(), address), None);
    assert_eq!(found_device(&filter, "MyDroneController".into(), address), None);
}

#[test]
fn controller_data_uses_wire_field_names() {
    let value: serde_json::Value = serde_json::from_slice(&sample().to_payload().unwrap()).unwrap();

    assert_eq!(value["leftStick"]["y"], -1.0);
    assert_eq!(value["rightStick"]["y"], 0.25);
    assert_eq!(value["buttons"]["a"], true);
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("dronelink-test-{}", std::process::id()))
        .join(name)
}

#[test]
fn config_defaults_to_fixed_identifiers() {
    let config = AdapterConfig::load(&temp_path("missing/config.json")).unwrap();

    assert_eq!(config.name_prefix, "DroneController");
    assert_eq!(config.service_uuid, CONTROL_SERVICE_UUID);
    assert_eq!(config.characteristic_uuid, CONTROL_CHARACTERISTIC_UUID);
    assert_eq!(
        CONTROL_SERVICE_UUID.to_string().to_uppercase(),
        "0000FFE0-0000-1000-8000-00805F9B34FB"
    );
}

#[test]
fn config_saved_and_loaded_back() {
    let path = temp_path("saved/config.json");
    let config = AdapterConfig {
        name_prefix: "Quad".into(),
        scan_timeout_secs: 3,
        ..Default::default()
    };

    config.save(&path).unwrap();

    assert_eq!(AdapterConfig::load(&path).unwrap(), config);
}

#[test]
fn config_partial_file_keeps_defaults() {
    let path = temp_path("partial/config.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{"scan_timeout_secs": 30}"#).unwrap();

    let config = AdapterConfig::load(&path).unwrap();

    assert_eq!(config.scan_timeout_secs, 30);
    assert_eq!(config.name_prefix, DEVICE_NAME_PREFIX);
}

#[test]
fn config_malformed_file_is_an_error() {
    let path = temp_path("malformed/config.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        AdapterConfig::load(&path),
        Err(LinkError::Config(_))
    ));
}

#[test]
fn tail_keeps_last_lines_in_order() {
    let content = "one\ntwo\nthree\nfour\n";

    assert_eq!(tail_lines(content, 2), vec!["three", "four"]);
    assert_eq!(tail_lines(content, 10), vec!["one", "two", "three", "four"]);
    assert!(tail_lines(content, 0).is_empty());
}

#[test]
fn log_directory_failure_is_reported() {
    let blocker = temp_path("log-blocker");
    std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
    std::fs::write(&blocker, "not a directory").unwrap();

    let logger = Logger::new("test", false, blocker.join("dronelink.log"));
    assert!(logger.prepare_dir().is_err());

    let logger = Logger::new("test", false, temp_path("logs/dronelink.log"));
    logger.prepare_dir().unwrap();
    assert!(logger.path().parent().unwrap().is_dir());
}
