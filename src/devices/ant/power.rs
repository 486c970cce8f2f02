//! ANT+ Cycling Power Profile (Device Type 11)

use crate::devices::ant::pages::parse_common_page;
use crate::devices::ant::PageDecoder;
use crate::devices::remote::DecodeOutcome;
use crate::devices::DeviceCore;
use crate::sensors::{Sensor, SensorType};
use std::sync::Arc;

/// Power-only data page (Page 0x10 / 16)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerOnlyPage {
    /// Update event count (wraps at 255)
    pub event_count: u8,
    /// Right pedal share in percent, if the meter reports it
    pub pedal_balance: Option<u8>,
    /// Instantaneous cadence (if available)
    pub cadence: Option<u8>,
    /// Accumulated power (wraps at 65535)
    pub accumulated_power: u16,
    /// Instantaneous power in watts
    pub instantaneous_power: u16,
}

impl PowerOnlyPage {
    pub const PAGE: u8 = 0x10;

    pub fn parse(data: &[u8; 8]) -> Option<Self> {
        if data[0] != Self::PAGE {
            return None;
        }

        let balance = data[2];
        let pedal_balance = (balance != 0xFF && (balance & 0x80) != 0).then_some(balance & 0x7F);

        Some(Self {
            event_count: data[1],
            pedal_balance,
            cadence: (data[3] != 0xFF).then_some(data[3]),
            accumulated_power: u16::from_le_bytes([data[4], data[5]]),
            instantaneous_power: u16::from_le_bytes([data[6], data[7]]),
        })
    }
}

/// Power and cadence from power-only pages.
///
/// A meter that stops updating keeps re-broadcasting its last page; once the
/// event count has not changed for `max_identical` pages, power and cadence
/// are forced to zero.
#[derive(Debug)]
pub struct PowerDecoder {
    power: Arc<Sensor<i32>>,
    cadence: Arc<Sensor<i32>>,
    max_identical: u32,
    last_event_count: Option<u8>,
    identical: u32,
}

impl PowerDecoder {
    pub fn new(core: &mut DeviceCore, max_identical: u32) -> Self {
        Self {
            power: core.add_sensor(SensorType::Power),
            cadence: core.add_sensor(SensorType::Cadence),
            max_identical: max_identical.max(1),
            last_event_count: None,
            identical: 0,
        }
    }

    fn power_only(&mut self, page: PowerOnlyPage) {
        if self.last_event_count == Some(page.event_count) {
            self.identical = self.identical.saturating_add(1);
            if self.identical == self.max_identical {
                tracing::debug!("Power meter stopped updating, forcing zero");
                self.power.new_value(0);
                self.cadence.new_value(0);
            }
            return;
        }

        self.identical = 0;
        self.last_event_count = Some(page.event_count);
        self.power.new_value(i32::from(page.instantaneous_power));
        if let Some(cadence) = page.cadence {
            self.cadence.new_value(i32::from(cadence));
        }
    }
}

impl PageDecoder for PowerDecoder {
    fn decode_page(&mut self, page: &[u8; 8]) -> DecodeOutcome {
        if let Some(power) = PowerOnlyPage::parse(page) {
            self.power_only(power);
            return DecodeOutcome::Measurement;
        }

        match parse_common_page(page) {
            Some(metadata) => DecodeOutcome::Metadata(metadata),
            None => DecodeOutcome::Ignored,
        }
    }

    fn reset(&mut self) {
        self.last_event_count = None;
        self.identical = 0;
    }
}
