//! Cycling Speed and Cadence (0x2A5B) decoding.

use crate::devices::ble::MeasurementDecoder;
use crate::devices::cycling::{CrankChannel, WheelChannel};
use crate::devices::revolution::{RevolutionCounter, TICKS_PER_SECOND_1024};
use crate::devices::{DeviceCore, DeviceType};

/// Parsed CSC Measurement characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CscMeasurement {
    /// Cumulative wheel revolutions and last wheel event time (1/1024 s)
    pub wheel: Option<(u32, u16)>,
    /// Cumulative crank revolutions and last crank event time (1/1024 s)
    pub crank: Option<(u16, u16)>,
}

/// Parse CSC Measurement notification.
///
/// The data format is:
/// - Byte 0: Flags (bit 0 wheel data present, bit 1 crank data present)
/// - Wheel data: u32 cumulative revolutions, u16 last event time
/// - Crank data: u16 cumulative revolutions, u16 last event time
pub fn parse_csc_measurement(data: &[u8]) -> Option<CscMeasurement> {
    let flags = *data.first()?;
    let mut result = CscMeasurement::default();
    let mut offset = 1usize;

    // Wheel Revolution Data (bit 0)
    if (flags & 0x01) != 0 {
        if offset + 6 > data.len() {
            return None;
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

    // Crank Revolution Data (bit 1)
    if (flags & 0x02) != 0 {
        if offset + 4 > data.len() {
            return None;
        }
        let revs = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let time = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
        result.crank = Some((revs, time));
    }

    Some(result)
}

/// Speed and/or cadence from CSC measurements.
#[derive(Debug)]
pub struct BikeDecoder {
    wheel: Option<WheelChannel>,
    crank: Option<CrankChannel>,
}

impl BikeDecoder {
    /// Adds the wheel sensors for speed devices and the cadence sensor for
    /// cadence devices.
    pub fn new(
        core: &mut DeviceCore,
        device_type: DeviceType,
        calibration_factor: f64,
        max_identical: u32,
    ) -> Self {
        let has_wheel = matches!(
            device_type,
            DeviceType::BikeSpeed | DeviceType::BikeSpeedAndCadence
        );
        let has_crank = matches!(
            device_type,
            DeviceType::BikeCadence | DeviceType::BikeSpeedAndCadence
        );

        let wheel = has_wheel.then(|| {
            WheelChannel::new(
                core,
                RevolutionCounter::count32(TICKS_PER_SECOND_1024, max_identical),
                calibration_factor,
            )
        });
        let crank = has_crank.then(|| {
            CrankChannel::new(
                core,
                RevolutionCounter::count16(TICKS_PER_SECOND_1024, max_identical),
            )
        });

        Self { wheel, crank }
    }

    /// Feed one raw CSC measurement. Returns false if nothing usable was in it.
    pub fn process(&mut self, data: &[u8]) -> bool {
        let Some(measurement) = parse_csc_measurement(data) else {
            tracing::debug!("Malformed CSC measurement: {:02X?}", data);
            return false;
        };

        let mut used = false;

        if let (Some(wheel), Some((revs, time))) = (self.wheel.as_mut(), measurement.wheel) {
            wheel.update(revs, time);
            used = true;
        }

        if let (Some(crank), Some((revs, time))) = (self.crank.as_mut(), measurement.crank) {
            crank.update(u32::from(revs), time);
            used = true;
        }

        used
    }
}

impl MeasurementDecoder for BikeDecoder {
    fn decode(&mut self, data: &[u8]) -> bool {
        self.process(data)
    }

    fn set_calibration_factor(&mut self, calibration_factor: f64) {
        if let Some(wheel) = self.wheel.as_mut() {
            wheel.set_calibration_factor(calibration_factor);
        }
    }

    fn reset(&mut self) {
        if let Some(wheel) = self.wheel.as_mut() {
            wheel.reset();
        }
        if let Some(crank) = self.crank.as_mut() {
            crank.reset();
        }
    }
}
