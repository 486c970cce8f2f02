//! Cycling Power Measurement (0x2A63) decoding.

use crate::devices::ble::MeasurementDecoder;
use crate::devices::cycling::{CrankChannel, WheelChannel};
use crate::devices::revolution::{RevolutionCounter, TICKS_PER_SECOND_1024, TICKS_PER_SECOND_2048};
use crate::devices::DeviceCore;
use crate::sensors::{Sensor, SensorType};
use std::sync::Arc;

/// Parsed Cycling Power Measurement data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CyclingPowerMeasurement {
    /// Instantaneous power in watts
    pub power_watts: i16,
    /// Pedal power balance (if present)
    pub power_balance: Option<u8>,
    /// Accumulated torque (if present)
    pub torque: Option<u16>,
    /// Cumulative wheel revolutions and last event time (1/2048 s)
    pub wheel: Option<(u32, u16)>,
    /// Cumulative crank revolutions and last event time (1/1024 s)
    pub crank: Option<(u16, u16)>,
}

/// Parse Cycling Power Measurement notification.
///
/// Optional fields after a truncation point are left empty.
pub fn parse_cycling_power_measurement(data: &[u8]) -> Option<CyclingPowerMeasurement> {
    if data.len() < 4 {
        return None;
    }

    let flags = u16::from_le_bytes([data[0], data[1]]);
    let mut result = CyclingPowerMeasurement {
        power_watts: i16::from_le_bytes([data[2], data[3]]),
        ..Default::default()
    };

    let mut offset = 4usize;

    // Pedal Power Balance (bit 0)
    if (flags & 0x0001) != 0 {
        if offset + 1 > data.len() {
            return Some(result);
        }
        result.power_balance = Some(data[offset]);
        offset += 1;
    }

    // Accumulated Torque (bit 2)
    if (flags & 0x0004) != 0 {
        if offset + 2 > data.len() {
            return Some(result);
        }
        result.torque = Some(u16::from_le_bytes([data[offset], data[offset + 1]]));
        offset += 2;
    }

    // Wheel Revolution Data (bit 4)
    if (flags & 0x0010) != 0 {
        if offset + 6 > data.len() {
            return Some(result);
        }
        let revs = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        let time = u16::from_le_bytes([data[offset + 4], data[offset + 5]]);
        result.wheel = Some((revs, time));
        offset += 6;
    }

    // Crank Revolution Data (bit 5)
    if (flags & 0x0020) != 0 {
        if offset + 4 > data.len() {
            return Some(result);
        }
        result.crank = Some((
            u16::from_le_bytes([data[offset], data[offset + 1]]),
            u16::from_le_bytes([data[offset + 2], data[offset + 3]]),
        ));
    }

    Some(result)
}

/// Power plus speed/cadence when the meter reports revolution data.
#[derive(Debug)]
pub struct PowerDecoder {
    power: Arc<Sensor<i32>>,
    wheel: WheelChannel,
    crank: CrankChannel,
}

impl PowerDecoder {
    pub fn new(core: &mut DeviceCore, calibration_factor: f64, max_identical: u32) -> Self {
        Self {
            power: core.add_sensor(SensorType::Power),
            wheel: WheelChannel::new(
                core,
                RevolutionCounter::count32(TICKS_PER_SECOND_2048, max_identical),
                calibration_factor,
            ),
            crank: CrankChannel::new(
                core,
                RevolutionCounter::count16(TICKS_PER_SECOND_1024, max_identical),
            ),
        }
    }

    pub fn process(&mut self, data: &[u8]) -> bool {
        let Some(measurement) = parse_cycling_power_measurement(data) else {
            tracing::debug!("Malformed cycling power measurement: {:02X?}", data);
            return false;
        };

        self.power.new_value(i32::from(measurement.power_watts));

        if let Some((revs, time)) = measurement.wheel {
            self.wheel.update(revs, time);
        }
        if let Some((revs, time)) = measurement.crank {
            self.crank.update(u32::from(revs), time);
        }
        true
    }
}

impl MeasurementDecoder for PowerDecoder {
    fn decode(&mut self, data: &[u8]) -> bool {
        self.process(data)
    }

    fn set_calibration_factor(&mut self, calibration_factor: f64) {
        self.wheel.set_calibration_factor(calibration_factor);
    }

    fn reset(&mut self) {
        self.wheel.reset();
        self.crank.reset();
    }
}
