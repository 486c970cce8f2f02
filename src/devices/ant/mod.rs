//! ANT+ device profiles.
//!
//! Every profile decodes 8-byte broadcast data pages. Most profiles carry the
//! page number in byte 0 (bit 7 is the page change toggle); the combined bike
//! speed & cadence profile has no page number at all.

pub mod bike;
pub mod heart_rate;
pub mod pages;
pub mod power;
pub mod run;

use crate::devices::remote::{DecodeOutcome, Frame, FrameDecoder};
use crate::devices::{DeviceCore, DeviceType};
use crate::sensors::SensorError;
use crate::storage::config::DecodingSettings;

pub use bike::{BikePage, CombinedBikePage, SpeedCadenceDecoder};
pub use heart_rate::{HeartRateDecoder, HeartRatePage};
pub use pages::{manufacturer_name, BatteryStatus, BatteryStatusValue, ManufacturerInfo};
pub use power::{PowerDecoder, PowerOnlyPage};
pub use run::{StrideSpeedDecoder, StrideSpeedPage};

/// ANT+ device type numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AntDeviceType {
    /// Power Meter (Device Type 11)
    Power,
    /// Heart Rate Monitor (Device Type 120)
    HeartRate,
    /// Combined Speed & Cadence Sensor (Device Type 121)
    SpeedAndCadence,
    /// Cadence-only Sensor (Device Type 122)
    Cadence,
    /// Speed-only Sensor (Device Type 123)
    Speed,
    /// Stride-based Speed & Distance Monitor (Device Type 124)
    StrideSpeed,
    /// Unknown device type
    Unknown(u8),
}

impl AntDeviceType {
    /// Get the ANT+ device type number
    pub fn device_type_number(&self) -> u8 {
        match self {
            AntDeviceType::Power => 11,
            AntDeviceType::HeartRate => 120,
            AntDeviceType::SpeedAndCadence => 121,
            AntDeviceType::Cadence => 122,
            AntDeviceType::Speed => 123,
            AntDeviceType::StrideSpeed => 124,
            AntDeviceType::Unknown(n) => *n,
        }
    }

    /// Create from device type number
    pub fn from_number(n: u8) -> Self {
        match n {
            11 => AntDeviceType::Power,
            120 => AntDeviceType::HeartRate,
            121 => AntDeviceType::SpeedAndCadence,
            122 => AntDeviceType::Cadence,
            123 => AntDeviceType::Speed,
            124 => AntDeviceType::StrideSpeed,
            _ => AntDeviceType::Unknown(n),
        }
    }

    /// ANT+ profile for a device type, if ANT+ has one.
    pub fn for_device_type(device_type: DeviceType) -> Option<Self> {
        match device_type {
            DeviceType::HeartRate => Some(AntDeviceType::HeartRate),
            DeviceType::BikeSpeed => Some(AntDeviceType::Speed),
            DeviceType::BikeCadence => Some(AntDeviceType::Cadence),
            DeviceType::BikeSpeedAndCadence => Some(AntDeviceType::SpeedAndCadence),
            DeviceType::BikePower => Some(AntDeviceType::Power),
            DeviceType::RunSpeed => Some(AntDeviceType::StrideSpeed),
            _ => None,
        }
    }
}

/// Decoding of the data pages of one ANT+ profile.
pub(crate) trait PageDecoder: Send {
    fn decode_page(&mut self, page: &[u8; 8]) -> DecodeOutcome;

    fn set_calibration_factor(&mut self, _calibration_factor: f64) {}

    fn reset(&mut self) {}
}

/// Build the decoder for an ANT+ device type, adding its sensors to `core`.
pub fn decoder_for(
    device_type: DeviceType,
    core: &mut DeviceCore,
    calibration_factor: f64,
    decoding: &DecodingSettings,
) -> Result<Box<dyn FrameDecoder>, SensorError> {
    let profile = AntDeviceType::for_device_type(device_type)
        .ok_or_else(|| SensorError::Unsupported(format!("{device_type} over ANT+")))?;

    let pages: Box<dyn PageDecoder> = match profile {
        AntDeviceType::HeartRate => Box::new(HeartRateDecoder::new(core)),
        AntDeviceType::SpeedAndCadence | AntDeviceType::Speed | AntDeviceType::Cadence => {
            Box::new(SpeedCadenceDecoder::new(
                core,
                profile,
                calibration_factor,
                decoding.max_identical_frames,
            ))
        }
        AntDeviceType::Power => Box::new(PowerDecoder::new(core, decoding.max_identical_frames)),
        AntDeviceType::StrideSpeed => Box::new(StrideSpeedDecoder::new(core, calibration_factor)),
        AntDeviceType::Unknown(n) => {
            return Err(SensorError::Unsupported(format!("ANT+ device type {n}")))
        }
    };

    tracing::debug!(
        "ANT+ profile {} for {}",
        profile.device_type_number(),
        device_type
    );

    Ok(Box::new(AntDecoder { pages }))
}

struct AntDecoder {
    pages: Box<dyn PageDecoder>,
}

impl FrameDecoder for AntDecoder {
    fn decode(&mut self, frame: &Frame) -> DecodeOutcome {
        match frame {
            Frame::Ant { page } => self.pages.decode_page(page),
            Frame::Ble { .. } => DecodeOutcome::Ignored,
        }
    }

    fn set_calibration_factor(&mut self, calibration_factor: f64) {
        self.pages.set_calibration_factor(calibration_factor);
    }

    fn reset(&mut self) {
        self.pages.reset();
    }
}

/// Page number without the page change toggle bit.
pub(crate) fn page_number(page: &[u8; 8]) -> u8 {
    page[0] & 0x7F
}
