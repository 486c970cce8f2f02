//! ANT+ Heart Rate Profile (Device Type 120)

use crate::devices::ant::pages::{manufacturer_name, BatteryStatusValue};
use crate::devices::ant::{page_number, PageDecoder};
use crate::devices::remote::{DecodeOutcome, DeviceMetadata};
use crate::devices::DeviceCore;
use crate::sensors::{Sensor, SensorType};
use std::sync::Arc;

/// Heart rate data carried by every HR page (bytes 4-7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRatePage {
    /// Page number (0-7)
    pub page_number: u8,
    /// Whether page change toggle bit is set
    pub page_change_toggle: bool,
    /// Heart beat event time (1/1024 second resolution)
    pub beat_time: u16,
    /// Heart beat count (wraps at 255)
    pub beat_count: u8,
    /// Computed heart rate in BPM, 0 when invalid
    pub heart_rate: u8,
    /// Page-specific bytes 1-3
    pub specific: [u8; 3],
}

impl HeartRatePage {
    pub fn parse(data: &[u8; 8]) -> Self {
        Self {
            page_number: page_number(data),
            page_change_toggle: (data[0] & 0x80) != 0,
            beat_time: u16::from_le_bytes([data[4], data[5]]),
            beat_count: data[6],
            heart_rate: data[7],
            specific: [data[1], data[2], data[3]],
        }
    }

    /// Device information carried by background pages 2 and 7.
    pub fn metadata(&self) -> Option<DeviceMetadata> {
        match self.page_number {
            // Manufacturer ID, serial number
            2 => Some(DeviceMetadata {
                manufacturer: Some(manufacturer_name(u16::from(self.specific[0]))),
                battery_percentage: None,
            }),
            // Battery level, fractional voltage, descriptive bit field
            7 => {
                let percentage = if self.specific[0] <= 100 {
                    Some(self.specific[0])
                } else {
                    BatteryStatusValue::from_bits(self.specific[2] >> 4).percentage()
                };
                percentage.map(|p| DeviceMetadata {
                    manufacturer: None,
                    battery_percentage: Some(p),
                })
            }
            _ => None,
        }
    }
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
}

impl PageDecoder for HeartRateDecoder {
    fn decode_page(&mut self, page: &[u8; 8]) -> DecodeOutcome {
        let page = HeartRatePage::parse(page);

        if page.heart_rate == 0 {
            self.heart_rate.clear_value();
        } else {
            self.heart_rate.new_value(i32::from(page.heart_rate));
        }

        match page.metadata() {
            Some(metadata) => DecodeOutcome::MeasurementWithMetadata(metadata),
            None => DecodeOutcome::Measurement,
        }
    }
}
