//! ANT+ Bike Speed and Cadence Profiles (Device Types 121, 122, 123)

use crate::devices::ant::pages::{manufacturer_name, BatteryStatusValue};
use crate::devices::ant::{page_number, AntDeviceType, PageDecoder};
use crate::devices::cycling::{CrankChannel, WheelChannel};
use crate::devices::remote::{DecodeOutcome, DeviceMetadata};
use crate::devices::revolution::{RevolutionCounter, TICKS_PER_SECOND_1024};
use crate::devices::DeviceCore;

/// Combined speed & cadence page (no page number).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinedBikePage {
    pub cadence_event_time: u16,
    pub cadence_revolutions: u16,
    pub speed_event_time: u16,
    pub speed_revolutions: u16,
}

impl CombinedBikePage {
    pub fn parse(data: &[u8; 8]) -> Self {
        Self {
            cadence_event_time: u16::from_le_bytes([data[0], data[1]]),
            cadence_revolutions: u16::from_le_bytes([data[2], data[3]]),
            speed_event_time: u16::from_le_bytes([data[4], data[5]]),
            speed_revolutions: u16::from_le_bytes([data[6], data[7]]),
        }
    }
}

/// Speed-only or cadence-only page (pages 0-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BikePage {
    pub page_number: u8,
    /// Event time (1/1024 second resolution)
    pub event_time: u16,
    /// Cumulative revolution count (wraps at 65535)
    pub revolutions: u16,
    /// Page-specific bytes 1-3
    pub specific: [u8; 3],
}

impl BikePage {
    pub fn parse(data: &[u8; 8]) -> Self {
        Self {
            page_number: page_number(data),
            event_time: u16::from_le_bytes([data[4], data[5]]),
            revolutions: u16::from_le_bytes([data[6], data[7]]),
            specific: [data[1], data[2], data[3]],
        }
    }

    /// Device information carried by background pages 2 and 4.
    pub fn metadata(&self) -> Option<DeviceMetadata> {
        match self.page_number {
            2 => Some(DeviceMetadata {
                manufacturer: Some(manufacturer_name(u16::from(self.specific[0]))),
                battery_percentage: None,
            }),
            4 => BatteryStatusValue::from_bits(self.specific[2] >> 4)
                .percentage()
                .map(|p| DeviceMetadata {
                    manufacturer: None,
                    battery_percentage: Some(p),
                }),
            _ => None,
        }
    }
}

/// Speed, cadence or both from ANT+ bike sensors.
#[derive(Debug)]
pub struct SpeedCadenceDecoder {
    profile: AntDeviceType,
    wheel: Option<WheelChannel>,
    crank: Option<CrankChannel>,
}

impl SpeedCadenceDecoder {
    pub fn new(
        core: &mut DeviceCore,
        profile: AntDeviceType,
        calibration_factor: f64,
        max_identical: u32,
    ) -> Self {
        let has_wheel = matches!(
            profile,
            AntDeviceType::Speed | AntDeviceType::SpeedAndCadence
        );
        let has_crank = matches!(
            profile,
            AntDeviceType::Cadence | AntDeviceType::SpeedAndCadence
        );

        let wheel = has_wheel.then(|| {
            WheelChannel::new(
                core,
                RevolutionCounter::count16(TICKS_PER_SECOND_1024, max_identical),
                calibration_factor,
            )
        });
        let crank = has_crank.then(|| {
            CrankChannel::new(
                core,
                RevolutionCounter::count16(TICKS_PER_SECOND_1024, max_identical),
            )
        });

        Self {
            profile,
            wheel,
            crank,
        }
    }
}

impl PageDecoder for SpeedCadenceDecoder {
    fn decode_page(&mut self, page: &[u8; 8]) -> DecodeOutcome {
        if self.profile == AntDeviceType::SpeedAndCadence {
            let page = CombinedBikePage::parse(page);
            if let Some(wheel) = self.wheel.as_mut() {
                wheel.update(u32::from(page.speed_revolutions), page.speed_event_time);
            }
            if let Some(crank) = self.crank.as_mut() {
                crank.update(u32::from(page.cadence_revolutions), page.cadence_event_time);
            }
            return DecodeOutcome::Measurement;
        }

        let page = BikePage::parse(page);
        if let Some(wheel) = self.wheel.as_mut() {
            wheel.update(u32::from(page.revolutions), page.event_time);
        }
        if let Some(crank) = self.crank.as_mut() {
            crank.update(u32::from(page.revolutions), page.event_time);
        }

        match page.metadata() {
            Some(metadata) => DecodeOutcome::MeasurementWithMetadata(metadata),
            None => DecodeOutcome::Measurement,
        }
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
