//! Integration tests for pairing and calibration changes from the settings layer.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use trainingtracker::devices::{DeviceId, Frame};
use trainingtracker::sensors::SensorError;
use trainingtracker::storage::{DeviceRecord, DeviceStore, InMemoryDeviceStore, StoreError};
use trainingtracker::transport::{SearchDriver, SearchReporter, SearchRequest};
use trainingtracker::{
    AppConfig, DeviceEvent, DeviceManager, DeviceType, EventBus, InvariantViolation,
    SensorType, SettingsEvent,
};

#[derive(Default)]
struct RecordingDriver {
    requests: Mutex<Vec<SearchRequest>>,
}

impl RecordingDriver {
    fn searched(&self) -> Vec<DeviceId> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.device_id)
            .collect()
    }
}

impl SearchDriver for RecordingDriver {
    fn begin_search(&self, request: SearchRequest, _reporter: SearchReporter) {
        self.requests.lock().unwrap().push(request);
    }
}

struct Fixture {
    manager: Arc<DeviceManager>,
    store: Arc<InMemoryDeviceStore>,
    driver: Arc<RecordingDriver>,
}

fn fixture(records: Vec<DeviceRecord>) -> Fixture {
    let store = Arc::new(InMemoryDeviceStore::with_devices(records));
    let driver = Arc::new(RecordingDriver::default());
    let manager = DeviceManager::new(
        AppConfig::default(),
        store.clone(),
        driver.clone(),
        EventBus::default(),
    );
    Fixture {
        manager,
        store,
        driver,
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn paired(device_id: DeviceId) -> SettingsEvent {
    SettingsEvent::PairingChanged {
        device_id,
        paired: true,
    }
}

fn unpaired(device_id: DeviceId) -> SettingsEvent {
    SettingsEvent::PairingChanged {
        device_id,
        paired: false,
    }
}

#[test]
fn test_new_pairing_while_idle_searches_once() {
    let f = fixture(vec![DeviceRecord::ant(
        42,
        "HRM",
        DeviceType::HeartRate,
        4242,
    )]);
    let mut rx = f.manager.events().subscribe();

    f.manager.handle_settings_event(paired(42)).unwrap();

    assert_eq!(f.manager.currently_searching(), Some(42));
    assert_eq!(f.manager.remaining_tries(42), Some(1));
    assert_eq!(f.driver.searched(), vec![42]);

    let events = drain(&mut rx);
    assert!(events.contains(&DeviceEvent::NewDevice {
        device_id: 42,
        device_type: DeviceType::HeartRate,
    }));
    assert!(events.contains(&DeviceEvent::PairingChanged {
        device_id: 42,
        paired: true,
    }));

    // One attempt only: a failure removes the device
    f.manager.on_search_stopped(42, false);
    assert!(f.manager.remote_device(42).is_none());
    assert_eq!(f.manager.currently_searching(), None);
}

#[test]
fn test_new_pairing_waits_for_current_search() {
    let f = fixture(vec![
        DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
        DeviceRecord::ant(2, "Cadence", DeviceType::BikeCadence, 22).unpaired(),
    ]);
    f.manager.search_for_paired_devices().unwrap();

    f.store.set_paired(2, true).unwrap();
    f.manager.handle_settings_event(paired(2)).unwrap();

    assert_eq!(f.manager.currently_searching(), Some(1));
    assert_eq!(f.manager.remaining_tries(2), Some(1));

    f.manager.deliver_frame(
        1,
        Frame::Ant {
            page: [0x04, 0, 0, 0, 0, 0, 1, 128],
        },
    );
    assert_eq!(f.manager.currently_searching(), Some(2));
    assert_eq!(f.driver.searched(), vec![1, 2]);
}

#[test]
fn test_pairing_tracked_device_is_a_violation() {
    let f = fixture(vec![DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11)]);
    f.manager.search_for_paired_devices().unwrap();
    let mut rx = f.manager.events().subscribe();

    f.manager.handle_settings_event(paired(1)).unwrap();

    assert!(drain(&mut rx).contains(&DeviceEvent::InvariantViolated(
        InvariantViolation::AlreadyPaired(1)
    )));
    assert_eq!(f.driver.searched(), vec![1]);
    assert_eq!(f.manager.remaining_tries(1), Some(3));
}

#[test]
fn test_pairing_unknown_device_fails() {
    let f = fixture(vec![]);

    let result = f.manager.handle_settings_event(paired(77));

    assert!(matches!(
        result,
        Err(SensorError::Store(StoreError::NotFound(77)))
    ));
    assert!(f.manager.remote_devices().is_empty());
    assert!(f.driver.searched().is_empty());
}

#[test]
fn test_unpairing_current_device_moves_on() {
    let f = fixture(vec![
        DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
        DeviceRecord::ant(2, "HRM 2", DeviceType::HeartRate, 22),
    ]);
    f.manager.search_for_paired_devices().unwrap();
    let mut rx = f.manager.events().subscribe();

    f.manager.handle_settings_event(unpaired(1)).unwrap();

    assert!(f.manager.remote_device(1).is_none());
    assert_eq!(f.manager.remaining_tries(1), None);
    assert_eq!(f.manager.currently_searching(), Some(2));
    assert_eq!(f.driver.searched(), vec![1, 2]);

    let events = drain(&mut rx);
    assert!(events.contains(&DeviceEvent::DeviceRemoved { device_id: 1 }));
    assert!(events.contains(&DeviceEvent::PairingChanged {
        device_id: 1,
        paired: false,
    }));
}

#[test]
fn test_unpairing_queued_device_keeps_current_search() {
    let f = fixture(vec![
        DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
        DeviceRecord::ant(2, "HRM 2", DeviceType::HeartRate, 22),
    ]);
    f.manager.search_for_paired_devices().unwrap();

    f.manager.handle_settings_event(unpaired(2)).unwrap();

    assert_eq!(f.manager.currently_searching(), Some(1));
    assert_eq!(f.manager.remaining_tries(2), None);

    // Device 2 never comes back in this pass
    f.manager.on_search_stopped(1, false);
    assert_eq!(f.driver.searched(), vec![1, 1]);
}

#[test]
fn test_unpairing_receiving_device_unregisters_its_sensors() {
    let f = fixture(vec![DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11)]);
    f.manager.search_for_paired_devices().unwrap();
    f.manager.deliver_frame(
        1,
        Frame::Ant {
            page: [0x04, 0, 0, 0, 0, 0, 1, 140],
        },
    );
    assert_eq!(f.manager.sensors(SensorType::HeartRate).len(), 1);

    f.manager.handle_settings_event(unpaired(1)).unwrap();

    assert!(f.manager.sensors(SensorType::HeartRate).is_empty());
    assert!(f.manager.remote_devices().is_empty());
}

#[test]
fn test_calibration_change_is_read_from_the_store() {
    let f = fixture(vec![DeviceRecord::ant(1, "Speed", DeviceType::BikeSpeed, 11)]);
    f.manager.search_for_paired_devices().unwrap();
    let mut rx = f.manager.events().subscribe();

    f.store.set_calibration_factor(1, 2.2).unwrap();
    f.manager
        .handle_settings_event(SettingsEvent::CalibrationFactorChanged { device_id: 1 })
        .unwrap();

    assert_eq!(f.manager.remote_device(1).unwrap().calibration_factor, 2.2);
    assert!(drain(&mut rx).contains(&DeviceEvent::CalibrationFactorChanged {
        device_id: 1,
        factor: 2.2,
    }));
}

#[test]
fn test_set_calibration_factor_persists() {
    let f = fixture(vec![DeviceRecord::ant(1, "Footpod", DeviceType::RunSpeed, 11)]);
    f.manager.search_for_paired_devices().unwrap();

    f.manager.set_calibration_factor(1, 1.05).unwrap();

    assert_eq!(f.store.calibration_factor(1).unwrap(), 1.05);
    assert_eq!(f.manager.remote_device(1).unwrap().calibration_factor, 1.05);
    assert!(f.manager.set_calibration_factor(9, 1.0).is_err());
}

#[tokio::test]
async fn test_settings_listener_forwards_events() {
    let f = fixture(vec![DeviceRecord::ant(5, "HRM", DeviceType::HeartRate, 55)]);
    let mut rx = f.manager.events().subscribe();
    let (tx, settings) = tokio::sync::mpsc::channel(8);

    let listener = f
        .manager
        .spawn_settings_listener(&tokio::runtime::Handle::current(), settings);
    tx.send(paired(5)).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event @ DeviceEvent::PairingChanged { .. }) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event bus closed: {e}"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        event,
        DeviceEvent::PairingChanged {
            device_id: 5,
            paired: true,
        }
    );
    assert_eq!(f.manager.currently_searching(), Some(5));

    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), listener)
        .await
        .unwrap()
        .unwrap();
}
