//! Integration tests for the sequential search over paired devices.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use trainingtracker::devices::{DeviceId, DeviceMetadata, Frame, SearchState};
use trainingtracker::storage::device_store::{DeviceRecord, InMemoryDeviceStore};
use trainingtracker::transport::{SearchDriver, SearchReporter, SearchRequest};
use trainingtracker::{
    AppConfig, DeviceEvent, DeviceManager, DeviceType, EventBus, InvariantViolation, SensorType,
    SettingsEvent, SportType,
};

/// Records search requests instead of talking to a radio.
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

    fn last(&self) -> SearchRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

impl SearchDriver for RecordingDriver {
    fn begin_search(&self, request: SearchRequest, _reporter: SearchReporter) {
        self.requests.lock().unwrap().push(request);
    }
}

fn setup(
    records: Vec<DeviceRecord>,
    config: AppConfig,
) -> (Arc<DeviceManager>, Arc<RecordingDriver>) {
    let driver = Arc::new(RecordingDriver::default());
    let manager = DeviceManager::new(
        config,
        Arc::new(InMemoryDeviceStore::with_devices(records)),
        driver.clone(),
        EventBus::default(),
    );
    (manager, driver)
}

fn config_with_tries(search_tries: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.search.search_tries = search_tries;
    config
}

fn hr_page(heart_rate: u8) -> Frame {
    Frame::Ant {
        page: [0x04, 0, 0, 0, 0, 0, 1, heart_rate],
    }
}

fn searching_devices(manager: &DeviceManager) -> Vec<DeviceId> {
    manager
        .remote_devices()
        .into_iter()
        .filter(|d| d.search_state == SearchState::Searching)
        .map(|d| d.id)
        .collect()
}

fn assert_single_search(manager: &DeviceManager) {
    let searching = searching_devices(manager);
    assert!(searching.len() <= 1, "several devices searching: {searching:?}");
    assert_eq!(searching.first().copied(), manager.currently_searching());
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[test]
fn test_all_devices_failing_are_removed_after_their_tries() {
    let (manager, driver) = setup(
        vec![
            DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
            DeviceRecord::ant(2, "Cadence", DeviceType::BikeCadence, 22),
            DeviceRecord::bluetooth(3, "Power", DeviceType::BikePower, "AA:BB:CC:DD:EE:FF"),
        ],
        config_with_tries(2),
    );
    let mut rx = manager.events().subscribe();

    manager.search_for_paired_devices().unwrap();
    while let Some(device_id) = manager.currently_searching() {
        manager.on_search_stopped(device_id, false);
    }

    assert_eq!(driver.searched(), vec![1, 2, 3, 1, 2, 3]);
    assert!(manager.remote_devices().is_empty());

    let events = drain(&mut rx);
    let finished = events
        .iter()
        .filter(|e| **e == DeviceEvent::SearchFinishedForAll)
        .count();
    assert_eq!(finished, 1);
    assert_eq!(events.last(), Some(&DeviceEvent::SearchFinishedForAll));

    let removed: Vec<DeviceId> = events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::DeviceRemoved { device_id } => Some(*device_id),
            _ => None,
        })
        .collect();
    assert_eq!(removed, vec![1, 2, 3]);
}

#[test]
fn test_failed_device_waits_behind_the_others() {
    let (manager, driver) = setup(
        vec![
            DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
            DeviceRecord::ant(2, "HRM 2", DeviceType::HeartRate, 22),
        ],
        config_with_tries(3),
    );

    manager.search_for_paired_devices().unwrap();
    manager.on_search_stopped(1, false);

    assert_eq!(manager.currently_searching(), Some(2));
    assert_eq!(manager.remaining_tries(1), Some(2));
    assert_eq!(
        manager.remote_device(1).map(|d| d.search_state),
        Some(SearchState::SearchFailed)
    );

    // Device 2 is found through its first measurement
    assert!(manager.deliver_frame(2, hr_page(101)));
    assert_eq!(manager.currently_searching(), Some(1));
    assert_eq!(driver.searched(), vec![1, 2, 1]);
    assert_eq!(
        manager.remote_device(1).map(|d| d.search_state),
        Some(SearchState::Searching)
    );
}

#[test]
fn test_found_device_reports_search_stopped() {
    let (manager, _driver) = setup(
        vec![DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11)],
        AppConfig::default(),
    );
    let mut rx = manager.events().subscribe();

    manager.search_for_paired_devices().unwrap();
    manager.deliver_frame(1, hr_page(90));

    let events = drain(&mut rx);
    let position = |wanted: &DeviceEvent| events.iter().position(|e| e == wanted);
    let started = position(&DeviceEvent::SearchStarted {
        device_id: 1,
        device_type: DeviceType::HeartRate,
        protocol: trainingtracker::Protocol::AntPlus,
    })
    .unwrap();
    let receiving = position(&DeviceEvent::ReceivingData { device_id: 1 }).unwrap();
    let stopped = position(&DeviceEvent::SearchStopped {
        device_id: 1,
        found: true,
    })
    .unwrap();
    let finished = position(&DeviceEvent::SearchFinishedForAll).unwrap();

    assert!(started < receiving);
    assert!(receiving < stopped);
    assert!(stopped < finished);
    assert_eq!(manager.sport_type(), SportType::Other);
}

#[test]
fn test_search_request_carries_address_and_timeout() {
    let mut config = AppConfig::default();
    config.search.search_timeout_secs = 12;
    let (manager, driver) = setup(
        vec![DeviceRecord::bluetooth(
            5,
            "Speed",
            DeviceType::BikeSpeed,
            "C4:7C:8D:6A:12:34",
        )],
        config,
    );

    manager.search_for_paired_devices().unwrap();

    let request = driver.last();
    assert_eq!(request.device_id, 5);
    assert_eq!(request.device_type, DeviceType::BikeSpeed);
    assert_eq!(
        request.address,
        trainingtracker::transport::DeviceAddress::Bluetooth("C4:7C:8D:6A:12:34".to_string())
    );
    assert_eq!(request.timeout, std::time::Duration::from_secs(12));
    assert!(!request.cancel.is_cancelled());
}

#[test]
fn test_unpaired_and_receiving_devices_are_not_queued() {
    let (manager, driver) = setup(
        vec![
            DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
            DeviceRecord::ant(2, "Old HRM", DeviceType::HeartRate, 22).unpaired(),
        ],
        AppConfig::default(),
    );

    manager.search_for_paired_devices().unwrap();
    manager.deliver_frame(1, hr_page(70));

    // A second pass finds nothing left to search
    manager.search_for_paired_devices().unwrap();
    assert_eq!(driver.searched(), vec![1]);
    assert_eq!(manager.currently_searching(), None);
}

#[test]
fn test_second_search_pass_does_not_disturb_the_current_one() {
    let (manager, driver) = setup(
        vec![
            DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
            DeviceRecord::ant(2, "HRM 2", DeviceType::HeartRate, 22),
        ],
        AppConfig::default(),
    );

    manager.search_for_paired_devices().unwrap();
    manager.search_for_paired_devices().unwrap();

    assert_eq!(driver.searched(), vec![1]);
    assert_eq!(manager.currently_searching(), Some(1));
}

#[test]
fn test_stale_search_report_is_a_violation() {
    let (manager, driver) = setup(
        vec![
            DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
            DeviceRecord::ant(2, "HRM 2", DeviceType::HeartRate, 22),
        ],
        AppConfig::default(),
    );
    let mut rx = manager.events().subscribe();
    manager.search_for_paired_devices().unwrap();

    manager.on_search_stopped(2, false);

    assert!(drain(&mut rx).contains(&DeviceEvent::InvariantViolated(
        InvariantViolation::UnexpectedSearchStopped {
            reported: 2,
            current: Some(1),
        }
    )));
    // The queue is left alone
    assert_eq!(manager.currently_searching(), Some(1));
    assert_eq!(driver.searched(), vec![1]);
}

#[test]
fn test_sport_restriction() {
    let mut config = AppConfig::default();
    config.search.restrict_to_sport = true;
    let (manager, driver) = setup(
        vec![
            DeviceRecord::ant(1, "Speed", DeviceType::BikeSpeed, 11),
            DeviceRecord::ant(2, "Footpod", DeviceType::RunSpeed, 22),
            DeviceRecord::ant(3, "HRM", DeviceType::HeartRate, 33),
        ],
        config,
    );
    manager.set_selected_sport(SportType::Run);

    manager.search_for_paired_devices().unwrap();
    assert_eq!(driver.searched(), vec![2]);

    manager.on_search_stopped(2, false);
    manager.on_search_stopped(3, false);
    assert_eq!(driver.searched(), vec![2, 3, 2]);
}

#[test]
fn test_sport_type_follows_receiving_devices() {
    let (manager, _driver) = setup(
        vec![DeviceRecord::ant(1, "Footpod", DeviceType::RunSpeed, 11)],
        AppConfig::default(),
    );
    manager.search_for_paired_devices().unwrap();
    assert_eq!(manager.sport_type(), SportType::Other);

    manager.deliver_frame(
        1,
        Frame::Ant {
            page: [0x01, 0, 0, 10, 0x02, 0, 0, 0],
        },
    );
    assert_eq!(manager.sport_type(), SportType::Run);
    assert_eq!(manager.sensors(SensorType::SpeedMps).len(), 1);
}

#[test]
fn test_connection_lost_searches_again() {
    let (manager, driver) = setup(
        vec![DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11)],
        config_with_tries(2),
    );
    let mut rx = manager.events().subscribe();
    manager.search_for_paired_devices().unwrap();
    manager.deliver_frame(1, hr_page(150));
    assert_eq!(manager.active_remote_devices().len(), 1);

    manager.on_connection_lost(1);

    assert!(drain(&mut rx).contains(&DeviceEvent::ConnectionLost { device_id: 1 }));
    assert!(manager.active_remote_devices().is_empty());
    assert!(manager.sensors(SensorType::HeartRate).is_empty());
    assert_eq!(manager.currently_searching(), Some(1));
    assert_eq!(manager.remaining_tries(1), Some(2));
    assert_eq!(driver.searched(), vec![1, 1]);

    // A report for a device that is not receiving is ignored
    manager.on_connection_lost(1);
    assert_eq!(driver.searched(), vec![1, 1]);
}

#[test]
fn test_metadata_deduplicated() {
    let (manager, _driver) = setup(
        vec![DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11)],
        AppConfig::default(),
    );
    manager.search_for_paired_devices().unwrap();
    let mut rx = manager.events().subscribe();

    let battery = DeviceMetadata {
        manufacturer: None,
        battery_percentage: Some(55),
    };
    manager.deliver_metadata(1, battery.clone());
    manager.deliver_metadata(1, battery);

    let battery_events = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, DeviceEvent::BatteryChanged { .. }))
        .count();
    assert_eq!(battery_events, 1);
    assert_eq!(
        manager.remote_device(1).unwrap().metadata.battery_percentage,
        Some(55)
    );
}

#[test]
fn test_new_lap_reaches_every_device() {
    let (manager, _driver) = setup(
        vec![DeviceRecord::ant(1, "Speed", DeviceType::BikeSpeed, 11).with_calibration_factor(1.0)],
        AppConfig::default(),
    );
    let mut rx = manager.events().subscribe();
    manager.search_for_paired_devices().unwrap();

    let page = |time: u16, revs: u16| {
        let mut page = [0u8; 8];
        page[4..6].copy_from_slice(&time.to_le_bytes());
        page[6..8].copy_from_slice(&revs.to_le_bytes());
        Frame::Ant { page }
    };
    manager.deliver_frame(1, page(0, 0));
    manager.deliver_frame(1, page(1024, 7));

    manager.new_lap();

    let lap = manager.sensors(SensorType::LapDistanceM);
    assert_eq!(lap.len(), 1);
    assert_eq!(lap[0].handle.as_double().unwrap().value(), Some(0.0));
    let distance = manager.sensors(SensorType::DistanceM);
    assert_eq!(distance[0].handle.as_double().unwrap().value(), Some(7.0));
    assert!(drain(&mut rx).contains(&DeviceEvent::NewLap));
}

#[test]
fn test_shut_down_stops_everything() {
    let (manager, driver) = setup(
        vec![
            DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
            DeviceRecord::ant(2, "HRM 2", DeviceType::HeartRate, 22),
        ],
        AppConfig::default(),
    );
    manager.search_for_paired_devices().unwrap();
    let cancel = driver.last().cancel;

    manager.shut_down();

    assert!(cancel.is_cancelled());
    assert!(manager.remote_devices().is_empty());

    // Late reports and new requests are ignored
    manager.on_search_stopped(1, false);
    manager.search_for_paired_devices().unwrap();
    assert!(!manager.deliver_frame(1, hr_page(80)));
    assert_eq!(driver.searched(), vec![1]);

    manager.shut_down();
    assert!(manager.is_shut_down());
}

#[test]
fn test_at_most_one_device_searches_while_retrying_and_pairing() {
    let (manager, driver) = setup(
        vec![
            DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
            DeviceRecord::ant(2, "Cadence", DeviceType::BikeCadence, 22),
            DeviceRecord::ant(3, "Power", DeviceType::BikePower, 33),
            DeviceRecord::ant(4, "Footpod", DeviceType::RunSpeed, 44).unpaired(),
        ],
        config_with_tries(2),
    );

    manager.search_for_paired_devices().unwrap();
    assert_single_search(&manager);
    while let Some(device_id) = manager.currently_searching() {
        manager.on_search_stopped(device_id, false);
        assert_single_search(&manager);
    }
    assert_eq!(driver.searched(), vec![1, 2, 3, 1, 2, 3]);

    manager
        .handle_settings_event(SettingsEvent::PairingChanged {
            device_id: 4,
            paired: true,
        })
        .unwrap();
    assert_single_search(&manager);
    assert_eq!(manager.currently_searching(), Some(4));
    assert_eq!(manager.remaining_tries(4), Some(1));
}

#[test]
fn test_found_report_without_data_frees_the_search() {
    let (manager, driver) = setup(
        vec![
            DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11),
            DeviceRecord::ant(2, "HRM 2", DeviceType::HeartRate, 22),
        ],
        AppConfig::default(),
    );
    let mut rx = manager.events().subscribe();

    manager.search_for_paired_devices().unwrap();
    manager.on_search_stopped(1, true);
    assert_single_search(&manager);
    assert_eq!(manager.currently_searching(), Some(2));
    assert_eq!(
        manager.remote_device(1).map(|d| d.search_state),
        Some(SearchState::Idle)
    );

    // A later pass queues device 1 again and searches it normally
    manager.search_for_paired_devices().unwrap();
    manager.on_search_stopped(2, false);
    assert_single_search(&manager);
    assert_eq!(manager.currently_searching(), Some(1));
    assert_eq!(driver.searched(), vec![1, 2, 1]);

    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, DeviceEvent::InvariantViolated(_))));

    // The first measurement still completes the search
    assert!(manager.deliver_frame(1, hr_page(95)));
    assert_single_search(&manager);
    assert_eq!(manager.currently_searching(), Some(2));
}

#[test]
fn test_sensor_listener_may_query_the_manager() {
    let (manager, _driver) = setup(
        vec![DeviceRecord::ant(1, "HRM", DeviceType::HeartRate, 11)],
        AppConfig::default(),
    );
    manager.search_for_paired_devices().unwrap();
    manager.deliver_frame(1, hr_page(120));

    let heart_rate = manager.sensors(SensorType::HeartRate);
    let sensor = heart_rate[0].handle.as_integer().unwrap().clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let weak = Arc::downgrade(&manager);
    sensor.add_listener(move |_, value| {
        if let Some(manager) = weak.upgrade() {
            let active = manager.active_remote_devices().len();
            let _ = manager.sport_type();
            let _ = manager.sensors(SensorType::HeartRate);
            seen_clone.lock().unwrap().push((value.copied(), active));
        }
    });

    let (done_tx, done_rx) = mpsc::channel();
    let worker = manager.clone();
    std::thread::spawn(move || {
        worker.deliver_frame(1, hr_page(121));
        worker.on_connection_lost(1);
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("manager blocked while a sensor listener called back into it");

    // Deactivation is reported after the device left ReceivingData
    assert_eq!(*seen.lock().unwrap(), vec![(Some(121), 1), (None, 0)]);
    assert_eq!(manager.currently_searching(), Some(1));
}
