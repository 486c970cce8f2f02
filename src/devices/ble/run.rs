//! Running Speed and Cadence (0x2A53) decoding.

use crate::devices::ble::MeasurementDecoder;
use crate::devices::DeviceCore;
use crate::sensors::{AccumulatorSensor, Sensor, SensorType};
use std::sync::Arc;

/// Parsed RSC Measurement characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RscMeasurement {
    /// Instantaneous speed in m/s
    pub speed_mps: f64,
    /// Instantaneous cadence in steps per minute
    pub cadence_spm: u8,
    /// Stride length in metres (if present)
    pub stride_length_m: Option<f64>,
    /// Total distance in 1/10 m (if present)
    pub total_distance_dm: Option<u32>,
    pub running: bool,
}

/// Parse RSC Measurement notification.
///
/// - Byte 0: Flags (bit 0 stride length, bit 1 total distance, bit 2 running)
/// - Bytes 1-2: speed (1/256 m/s), byte 3: cadence
/// - Optional u16 stride length (1/100 m), optional u32 total distance (1/10 m)
pub fn parse_rsc_measurement(data: &[u8]) -> Option<RscMeasurement> {
    if data.len() < 4 {
        return None;
    }

    let flags = data[0];
    let mut result = RscMeasurement {
        speed_mps: f64::from(u16::from_le_bytes([data[1], data[2]])) / 256.0,
        cadence_spm: data[3],
        running: (flags & 0x04) != 0,
        ..Default::default()
    };
    let mut offset = 4usize;

    if (flags & 0x01) != 0 {
        if offset + 2 > data.len() {
            return None;
        }
        let stride = u16::from_le_bytes([data[offset], data[offset + 1]]);
        result.stride_length_m = Some(f64::from(stride) / 100.0);
        offset += 2;
    }

    if (flags & 0x02) != 0 {
        if offset + 4 > data.len() {
            return None;
        }
        result.total_distance_dm = Some(u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]));
    }

    Some(result)
}

/// Speed, pace, cadence and distance from a foot pod.
///
/// The calibration factor scales the reported speed and distance.
#[derive(Debug)]
pub struct RunSpeedDecoder {
    calibration_factor: f64,
    speed: Arc<Sensor<f64>>,
    pace: Arc<Sensor<f64>>,
    cadence: Arc<Sensor<i32>>,
    distance: Arc<AccumulatorSensor<f64>>,
    lap_distance: Arc<AccumulatorSensor<f64>>,
    last_distance_dm: Option<u32>,
}

impl RunSpeedDecoder {
    pub fn new(core: &mut DeviceCore, calibration_factor: f64) -> Self {
        Self {
            calibration_factor,
            speed: core.add_sensor(SensorType::SpeedMps),
            pace: core.add_sensor(SensorType::PaceSpm),
            cadence: core.add_sensor(SensorType::Cadence),
            distance: core.add_accumulator(SensorType::DistanceM, 0.0, false),
            lap_distance: core.add_accumulator(SensorType::LapDistanceM, 0.0, true),
            last_distance_dm: None,
        }
    }

    pub fn process(&mut self, data: &[u8]) -> bool {
        let Some(measurement) = parse_rsc_measurement(data) else {
            tracing::debug!("Malformed RSC measurement: {:02X?}", data);
            return false;
        };

        let speed = self.calibration_factor * measurement.speed_mps;
        self.speed.new_value(speed);
        if speed > 0.0 {
            self.pace.new_value(1.0 / speed);
        } else {
            self.pace.clear_value();
        }
        self.cadence.new_value(i32::from(measurement.cadence_spm));

        if let Some(total) = measurement.total_distance_dm {
            if let Some(last) = self.last_distance_dm {
                let delta = self.calibration_factor * f64::from(total.wrapping_sub(last)) / 10.0;
                self.distance.increment(delta);
                self.lap_distance.increment(delta);
            }
            self.last_distance_dm = Some(total);
        }
        true
    }
}

impl MeasurementDecoder for RunSpeedDecoder {
    fn decode(&mut self, data: &[u8]) -> bool {
        self.process(data)
    }

    fn set_calibration_factor(&mut self, calibration_factor: f64) {
        self.calibration_factor = calibration_factor;
    }

    fn reset(&mut self) {
        self.last_distance_dm = None;
    }
}
