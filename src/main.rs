//! TrainingTracker - device core demo
//!
//! Runs the device manager against simulated devices and logs what happens.

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trainingtracker::devices::local::{Capabilities, LocationFix, LocationProvider};
use trainingtracker::manager::DeviceManager;
use trainingtracker::storage::config::load_config;
use trainingtracker::storage::device_store::{DeviceRecord, DeviceStore, InMemoryDeviceStore};
use trainingtracker::transport::{SimulatedBehaviour, SimulatedTransport, TokioSearchDriver};
use trainingtracker::{DeviceEvent, DeviceType, EventBus, Frame, SensorType};

/// A crank and wheel pair advancing steadily, as sent by a BLE CSC sensor.
fn csc_frames(count: u16) -> Vec<Frame> {
    (0..count)
        .map(|i| {
            let wheel_revs = u32::from(i) * 4;
            let wheel_time = i.wrapping_mul(1024);
            let crank_revs = i.wrapping_mul(2);
            let crank_time = i.wrapping_mul(1024);

            let mut data = vec![0x03];
            data.extend_from_slice(&wheel_revs.to_le_bytes());
            data.extend_from_slice(&wheel_time.to_le_bytes());
            data.extend_from_slice(&crank_revs.to_le_bytes());
            data.extend_from_slice(&crank_time.to_le_bytes());
            Frame::Ble {
                characteristic: trainingtracker::devices::ble::CSC_MEASUREMENT_UUID,
                data,
            }
        })
        .collect()
}

fn heart_rate_pages() -> Vec<Frame> {
    [128u8, 131, 135, 138]
        .iter()
        .map(|hr| Frame::Ant {
            page: [0x04, 0, 0, 0, 0, 0, 0, *hr],
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TrainingTracker v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config()?;
    config.search.search_timeout_secs = config.search.search_timeout_secs.min(5);

    let store = Arc::new(InMemoryDeviceStore::new());
    store.insert_device(&DeviceRecord::ant(1, "Chest strap", DeviceType::HeartRate, 4242))?;
    store.insert_device(&DeviceRecord::bluetooth(
        2,
        "Speed/cadence",
        DeviceType::BikeSpeedAndCadence,
        "C4:7C:8D:6A:12:34",
    ))?;
    store.insert_device(&DeviceRecord::ant(3, "Power meter", DeviceType::BikePower, 17))?;

    let interval = Duration::from_millis(250);
    let transport = Arc::new(
        SimulatedTransport::new()
            .with_device(1, SimulatedBehaviour::looping(heart_rate_pages(), interval))
            .with_device(2, SimulatedBehaviour::frames(csc_frames(20), interval))
            .with_device(3, SimulatedBehaviour::Unreachable),
    );
    let driver = Arc::new(TokioSearchDriver::new(
        transport,
        tokio::runtime::Handle::current(),
    ));

    let events = EventBus::default();
    let mut rx = events.subscribe();
    let manager = DeviceManager::new(config, store, driver, events);

    manager.create_local_devices(
        Capabilities {
            pressure_sensor: true,
            ..Capabilities::none()
        },
        Some(&tokio::runtime::Handle::current()),
    );
    manager.deliver_pressure(1001.3);
    manager.deliver_location(
        LocationProvider::Gps,
        LocationFix::new(45.07, 7.69, 5.0, chrono::Utc::now()),
    );

    manager.search_for_paired_devices()?;

    let deadline = tokio::time::sleep(Duration::from_secs(15));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = rx.recv() => match event {
                Ok(DeviceEvent::SearchFinishedForAll) => {
                    tracing::info!("Search finished");
                    break;
                }
                Ok(event) => tracing::info!("Event: {:?}", event),
                Err(e) => {
                    tracing::warn!("Event stream: {}", e);
                    break;
                }
            },
        }
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    for sensor_type in manager.registered_sensor_types() {
        let values: Vec<String> = manager
            .sensors(sensor_type)
            .iter()
            .filter_map(|s| s.handle.display_value())
            .collect();
        tracing::info!("{}: {:?}", sensor_type, values);
    }
    for device in manager.active_remote_devices() {
        tracing::info!("Active: {} ({}, {})", device.name, device.device_type, device.protocol);
    }
    if manager.sensors(SensorType::HeartRate).is_empty() {
        tracing::warn!("No heart rate");
    }

    manager.shut_down();
    Ok(())
}
