//! Bluetooth LE GATT decoders.
//!
//! Every BLE device also understands the Battery Level and Manufacturer Name
//! characteristics; those produce metadata, not measurements.

pub mod bike;
pub mod heart_rate;
pub mod power;
pub mod run;

use crate::devices::remote::{DecodeOutcome, DeviceMetadata, Frame, FrameDecoder};
use crate::devices::{DeviceCore, DeviceType};
use crate::sensors::SensorError;
use crate::storage::config::DecodingSettings;
use uuid::Uuid;

pub use bike::{parse_csc_measurement, BikeDecoder, CscMeasurement};
pub use heart_rate::{parse_heart_rate_measurement, HeartRateDecoder, HeartRateMeasurement};
pub use power::{parse_cycling_power_measurement, CyclingPowerMeasurement, PowerDecoder};
pub use run::{parse_rsc_measurement, RscMeasurement, RunSpeedDecoder};

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// CSC Measurement UUID (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Running Speed and Cadence Service UUID (0x1814)
pub const RSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1814_0000_1000_8000_0080_5f9b_34fb);

/// RSC Measurement UUID (0x2A53)
pub const RSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a53_0000_1000_8000_0080_5f9b_34fb);

/// Battery Level UUID (0x2A19)
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb);

/// Manufacturer Name String UUID (0x2A29)
pub const MANUFACTURER_NAME_UUID: Uuid =
    Uuid::from_u128(0x0000_2a29_0000_1000_8000_0080_5f9b_34fb);

/// Service a device of this type is expected to advertise.
pub fn service_for(device_type: DeviceType) -> Option<Uuid> {
    match device_type {
        DeviceType::HeartRate => Some(HEART_RATE_SERVICE_UUID),
        DeviceType::BikeSpeed | DeviceType::BikeCadence | DeviceType::BikeSpeedAndCadence => {
            Some(CSC_SERVICE_UUID)
        }
        DeviceType::BikePower => Some(CYCLING_POWER_SERVICE_UUID),
        DeviceType::RunSpeed => Some(RSC_SERVICE_UUID),
        _ => None,
    }
}

/// Measurement characteristic notifications are subscribed on.
pub fn measurement_characteristic_for(device_type: DeviceType) -> Option<Uuid> {
    match device_type {
        DeviceType::HeartRate => Some(HEART_RATE_MEASUREMENT_UUID),
        DeviceType::BikeSpeed | DeviceType::BikeCadence | DeviceType::BikeSpeedAndCadence => {
            Some(CSC_MEASUREMENT_UUID)
        }
        DeviceType::BikePower => Some(CYCLING_POWER_MEASUREMENT_UUID),
        DeviceType::RunSpeed => Some(RSC_MEASUREMENT_UUID),
        _ => None,
    }
}

/// Build the decoder for a BLE device type, adding its sensors to `core`.
pub fn decoder_for(
    device_type: DeviceType,
    core: &mut DeviceCore,
    calibration_factor: f64,
    decoding: &DecodingSettings,
) -> Result<Box<dyn FrameDecoder>, SensorError> {
    let measurement: Box<dyn MeasurementDecoder> = match device_type {
        DeviceType::HeartRate => Box::new(HeartRateDecoder::new(core)),
        DeviceType::BikeSpeed | DeviceType::BikeCadence | DeviceType::BikeSpeedAndCadence => {
            Box::new(BikeDecoder::new(
                core,
                device_type,
                calibration_factor,
                decoding.max_identical_frames,
            ))
        }
        DeviceType::BikePower => Box::new(PowerDecoder::new(
            core,
            calibration_factor,
            decoding.max_identical_frames,
        )),
        DeviceType::RunSpeed => Box::new(RunSpeedDecoder::new(core, calibration_factor)),
        other => {
            return Err(SensorError::Unsupported(format!(
                "{other} over Bluetooth LE"
            )))
        }
    };

    Ok(Box::new(BleDecoder {
        characteristic: measurement_characteristic_for(device_type).unwrap_or_default(),
        measurement,
    }))
}

/// Decoding of one measurement characteristic.
pub(crate) trait MeasurementDecoder: Send {
    /// Returns false for malformed payloads.
    fn decode(&mut self, data: &[u8]) -> bool;

    fn set_calibration_factor(&mut self, _calibration_factor: f64) {}

    fn reset(&mut self) {}
}

/// Routes characteristic values to the measurement decoder or the
/// device information parsers.
struct BleDecoder {
    characteristic: Uuid,
    measurement: Box<dyn MeasurementDecoder>,
}

impl FrameDecoder for BleDecoder {
    fn decode(&mut self, frame: &Frame) -> DecodeOutcome {
        let Frame::Ble {
            characteristic,
            data,
        } = frame
        else {
            return DecodeOutcome::Ignored;
        };

        if *characteristic == self.characteristic {
            if self.measurement.decode(data) {
                DecodeOutcome::Measurement
            } else {
                DecodeOutcome::Ignored
            }
        } else if *characteristic == BATTERY_LEVEL_UUID {
            match parse_battery_level(data) {
                Some(percentage) => DecodeOutcome::Metadata(DeviceMetadata {
                    battery_percentage: Some(percentage),
                    ..Default::default()
                }),
                None => DecodeOutcome::Ignored,
            }
        } else if *characteristic == MANUFACTURER_NAME_UUID {
            match parse_manufacturer_name(data) {
                Some(name) => DecodeOutcome::Metadata(DeviceMetadata {
                    manufacturer: Some(name),
                    ..Default::default()
                }),
                None => DecodeOutcome::Ignored,
            }
        } else {
            DecodeOutcome::Ignored
        }
    }

    fn set_calibration_factor(&mut self, calibration_factor: f64) {
        self.measurement.set_calibration_factor(calibration_factor);
    }

    fn reset(&mut self) {
        self.measurement.reset();
    }
}

/// Parse Battery Level (percentage, 0-100).
pub fn parse_battery_level(data: &[u8]) -> Option<u8> {
    data.first().copied().filter(|level| *level <= 100)
}

/// Parse Manufacturer Name String (UTF-8, may be NUL padded).
pub fn parse_manufacturer_name(data: &[u8]) -> Option<String> {
    let name = String::from_utf8_lossy(data);
    let name = name.trim_end_matches('\0').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
