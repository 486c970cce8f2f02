//! Heart Rate Measurement (0x2A37) decoding.

use crate::devices::ble::MeasurementDecoder;
use crate::devices::DeviceCore;
use crate::sensors::{Sensor, SensorType};
use std::sync::Arc;

/// Parsed Heart Rate Measurement notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    /// Heart rate in BPM
    pub heart_rate_bpm: u16,
    /// RR intervals in 1/1024 s (if present)
    pub rr_intervals: Vec<u16>,
    /// Energy expended in kJ (if present)
    pub energy_expended: Option<u16>,
    /// Sensor contact detected
    pub sensor_contact: bool,
    /// Whether the device reports contact status at all
    pub contact_supported: bool,
}

/// Parse Heart Rate Measurement notification.
pub fn parse_heart_rate_measurement(data: &[u8]) -> Option<HeartRateMeasurement> {
    let flags = *data.first()?;
    let hr_format_u16 = (flags & 0x01) != 0;
    let contact_supported = (flags & 0x04) != 0;
    let sensor_contact = contact_supported && ((flags & 0x02) != 0);
    let energy_expended_present = (flags & 0x08) != 0;
    let rr_interval_present = (flags & 0x10) != 0;

    let mut offset = 1usize;

    let heart_rate_bpm = if hr_format_u16 {
        if offset + 2 > data.len() {
            return None;
        }
        let hr = u16::from_le_bytes([data[offset], data[offset + 1]]);
        offset += 2;
        hr
    } else {
        let hr = u16::from(*data.get(offset)?);
        offset += 1;
        hr
    };

    let mut result = HeartRateMeasurement {
        heart_rate_bpm,
        sensor_contact,
        contact_supported,
        ..Default::default()
    };

    if energy_expended_present && offset + 2 <= data.len() {
        result.energy_expended = Some(u16::from_le_bytes([data[offset], data[offset + 1]]));
        offset += 2;
    }

    if rr_interval_present {
        while offset + 2 <= data.len() {
            result
                .rr_intervals
                .push(u16::from_le_bytes([data[offset], data[offset + 1]]));
            offset += 2;
        }
    }

    Some(result)
}

#[derive(Debug)]
pub struct HeartRateDecoder {
    heart_rate: Arc<Sensor<i32>>,
}

impl HeartRateDecoder {
    pub fn new(core: &mut DeviceCore) -> Self {
        Self {
            heart_rate: core.add_sensor(SensorType::HeartRate),
        }
    }

    pub fn process(&mut self, data: &[u8]) -> bool {
        let Some(measurement) = parse_heart_rate_measurement(data) else {
            tracing::debug!("Malformed heart rate measurement: {:02X?}", data);
            return false;
        };

        // A strap without skin contact reports garbage.
        if measurement.contact_supported && !measurement.sensor_contact {
            self.heart_rate.clear_value();
        } else {
            self.heart_rate
                .new_value(i32::from(measurement.heart_rate_bpm));
        }
        true
    }
}

impl MeasurementDecoder for HeartRateDecoder {
    fn decode(&mut self, data: &[u8]) -> bool {
        self.process(data)
    }
}
