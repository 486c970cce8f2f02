//! Unit tests for ANT+ data page decoding.

use std::sync::Arc;
use trainingtracker::devices::ant::{
    manufacturer_name, AntDeviceType, BatteryStatus, BatteryStatusValue, HeartRatePage,
    ManufacturerInfo, PowerOnlyPage, StrideSpeedPage,
};
use trainingtracker::devices::{Device, DeviceMetadata, Frame, RemoteDevice, RemoteDeviceInfo};
use trainingtracker::storage::config::DecodingSettings;
use trainingtracker::{DeviceType, EventBus, Protocol, SensorRegistry, SensorType};

fn ant_device(device_type: DeviceType, calibration_factor: f64) -> RemoteDevice {
    let events = EventBus::default();
    RemoteDevice::new(
        RemoteDeviceInfo {
            id: 3,
            name: "ANT+ sensor".to_string(),
            device_type,
            protocol: Protocol::AntPlus,
            calibration_factor,
        },
        Arc::new(SensorRegistry::new(events.clone())),
        events,
        &DecodingSettings::default(),
    )
    .unwrap()
}

fn integer_value(device: &RemoteDevice, sensor_type: SensorType) -> Option<i32> {
    device.core().sensor(sensor_type)?.as_integer()?.value()
}

fn double_value(device: &RemoteDevice, sensor_type: SensorType) -> Option<f64> {
    device.core().sensor(sensor_type)?.as_double()?.value()
}

fn power_page(event_count: u8, cadence: u8, power: u16) -> Frame {
    let mut page = [0x10, event_count, 0xFF, cadence, 0, 0, 0, 0];
    page[6..8].copy_from_slice(&power.to_le_bytes());
    Frame::Ant { page }
}

#[test]
fn test_profiles_for_device_types() {
    assert_eq!(
        AntDeviceType::for_device_type(DeviceType::HeartRate),
        Some(AntDeviceType::HeartRate)
    );
    assert_eq!(
        AntDeviceType::for_device_type(DeviceType::RunSpeed)
            .map(|p| p.device_type_number()),
        Some(124)
    );
    assert_eq!(AntDeviceType::for_device_type(DeviceType::Gps), None);
}

#[test]
fn test_heart_rate_background_pages() {
    // Page 2: manufacturer 1
    let page = HeartRatePage::parse(&[0x02, 1, 0x34, 0x12, 0, 0, 5, 70]);
    assert_eq!(
        page.metadata(),
        Some(DeviceMetadata {
            manufacturer: Some("Garmin".to_string()),
            battery_percentage: None,
        })
    );

    // Page 7: battery level 90 %
    let page = HeartRatePage::parse(&[0x87, 90, 0, 0, 0, 0, 5, 70]);
    assert_eq!(page.metadata().and_then(|m| m.battery_percentage), Some(90));
}

#[test]
fn test_common_pages() {
    let info = ManufacturerInfo::parse(&[80, 0xFF, 0xFF, 3, 32, 0, 0x01, 0x00]).unwrap();
    assert_eq!(info.manufacturer_id, 32);
    assert_eq!(manufacturer_name(info.manufacturer_id), "Wahoo Fitness");

    // Coarse voltage 3, fractional 128, status Good
    let status = BatteryStatus::parse(&[82, 0xFF, 0, 0, 0, 0, 128, 0x23]).unwrap();
    assert_eq!(status.battery_status, BatteryStatusValue::Good);
    assert_eq!(status.battery_voltage, Some(3.5));

    assert!(BatteryStatus::parse(&[80, 0, 0, 0, 0, 0, 0, 0]).is_none());
}

#[test]
fn test_heart_rate_zero_is_undefined() {
    let mut device = ant_device(DeviceType::HeartRate, 1.0);

    device.handle_frame(&Frame::Ant {
        page: [0x04, 0, 0, 0, 0, 0, 1, 128],
    });
    assert_eq!(integer_value(&device, SensorType::HeartRate), Some(128));

    device.handle_frame(&Frame::Ant {
        page: [0x04, 0, 0, 0, 0, 0, 2, 0],
    });
    assert_eq!(integer_value(&device, SensorType::HeartRate), None);
    assert!(device.is_receiving_data());
}

#[test]
fn test_power_only_page_parse() {
    let page = PowerOnlyPage::parse(&[0x10, 7, 0xB2, 90, 0x10, 0x27, 0x2C, 0x01]).unwrap();
    assert_eq!(page.event_count, 7);
    assert_eq!(page.pedal_balance, Some(50));
    assert_eq!(page.cadence, Some(90));
    assert_eq!(page.accumulated_power, 10000);
    assert_eq!(page.instantaneous_power, 300);

    assert!(PowerOnlyPage::parse(&[0x11, 0, 0, 0, 0, 0, 0, 0]).is_none());
}

#[test]
fn test_power_meter_stops_after_identical_pages() {
    let mut device = ant_device(DeviceType::BikePower, 1.0);

    device.handle_frame(&power_page(1, 85, 210));
    assert_eq!(integer_value(&device, SensorType::Power), Some(210));
    assert_eq!(integer_value(&device, SensorType::Cadence), Some(85));

    for _ in 0..3 {
        device.handle_frame(&power_page(1, 85, 210));
        assert_eq!(integer_value(&device, SensorType::Power), Some(210));
    }
    device.handle_frame(&power_page(1, 85, 210));
    assert_eq!(integer_value(&device, SensorType::Power), Some(0));
    assert_eq!(integer_value(&device, SensorType::Cadence), Some(0));

    device.handle_frame(&power_page(2, 80, 180));
    assert_eq!(integer_value(&device, SensorType::Power), Some(180));
}

#[test]
fn test_power_meter_metadata_page() {
    let mut device = ant_device(DeviceType::BikePower, 1.0);
    let _signal = device.start_searching();

    let outcome = device.handle_frame(&Frame::Ant {
        page: [80, 0xFF, 0xFF, 1, 7, 0, 0, 0],
    });

    assert_eq!(
        outcome.metadata.and_then(|m| m.manufacturer).as_deref(),
        Some("Quarq")
    );
    assert!(device.is_searching());
}

#[test]
fn test_speed_only_sensor() {
    let mut device = ant_device(DeviceType::BikeSpeed, 2.0);
    let page = |time: u16, revs: u16| {
        let mut page = [0u8; 8];
        page[4..6].copy_from_slice(&time.to_le_bytes());
        page[6..8].copy_from_slice(&revs.to_le_bytes());
        Frame::Ant { page }
    };

    device.handle_frame(&page(0, 100));
    device.handle_frame(&page(2048, 110));

    // 10 revolutions in 2 s of a 2 m wheel
    assert_eq!(double_value(&device, SensorType::SpeedMps), Some(10.0));
    assert_eq!(double_value(&device, SensorType::DistanceM), Some(20.0));
    assert_eq!(double_value(&device, SensorType::PaceSpm), Some(0.1));
    assert!(device.core().sensor(SensorType::Cadence).is_none());
}

#[test]
fn test_combined_speed_and_cadence() {
    let mut device = ant_device(DeviceType::BikeSpeedAndCadence, 2.0);
    let page = |cadence: (u16, u16), speed: (u16, u16)| {
        let mut page = [0u8; 8];
        page[0..2].copy_from_slice(&cadence.1.to_le_bytes());
        page[2..4].copy_from_slice(&cadence.0.to_le_bytes());
        page[4..6].copy_from_slice(&speed.1.to_le_bytes());
        page[6..8].copy_from_slice(&speed.0.to_le_bytes());
        Frame::Ant { page }
    };

    device.handle_frame(&page((10, 0), (50, 0)));
    device.handle_frame(&page((12, 1024), (55, 1024)));

    assert_eq!(integer_value(&device, SensorType::Cadence), Some(120));
    assert_eq!(double_value(&device, SensorType::SpeedMps), Some(10.0));
}

#[test]
fn test_lap_distance_resets_on_new_lap() {
    let mut device = ant_device(DeviceType::BikeSpeed, 1.0);
    let page = |time: u16, revs: u16| {
        let mut page = [0u8; 8];
        page[4..6].copy_from_slice(&time.to_le_bytes());
        page[6..8].copy_from_slice(&revs.to_le_bytes());
        Frame::Ant { page }
    };

    device.handle_frame(&page(0, 0));
    device.handle_frame(&page(1024, 5));
    assert_eq!(double_value(&device, SensorType::LapDistanceM), Some(5.0));

    device.new_lap();
    assert_eq!(double_value(&device, SensorType::LapDistanceM), Some(0.0));
    assert_eq!(double_value(&device, SensorType::DistanceM), Some(5.0));

    device.handle_frame(&page(2048, 8));
    assert_eq!(double_value(&device, SensorType::LapDistanceM), Some(3.0));
    assert_eq!(double_value(&device, SensorType::DistanceM), Some(8.0));
}

#[test]
fn test_stride_speed_pages() {
    // Page 1: distance 100.5 m, speed 2.5 m/s
    let page = StrideSpeedPage::parse(&[0x01, 0, 0, 100, 0x82, 128, 10, 0]).unwrap();
    assert_eq!(
        page,
        StrideSpeedPage::Distance {
            distance_m: 100.5,
            speed_mps: 2.5,
            stride_count: 10,
        }
    );

    // Page 2: cadence 172 spm, speed 3.0 m/s
    let page = StrideSpeedPage::parse(&[0x02, 0, 0, 172, 0x03, 0, 0, 0]).unwrap();
    assert_eq!(
        page,
        StrideSpeedPage::Cadence {
            cadence_spm: 172.0,
            speed_mps: 3.0,
        }
    );
}

#[test]
fn test_stride_distance_wraps() {
    let mut device = ant_device(DeviceType::RunSpeed, 1.0);
    let page = |distance: u8| Frame::Ant {
        page: [0x01, 0, 0, distance, 0x03, 0, 0, 0],
    };

    device.handle_frame(&page(250));
    device.handle_frame(&page(4));

    assert_eq!(double_value(&device, SensorType::DistanceM), Some(10.0));
    assert_eq!(double_value(&device, SensorType::SpeedMps), Some(3.0));
}
