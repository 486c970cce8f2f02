//! ANT+ common data pages and manufacturer identifiers.

use crate::devices::remote::DeviceMetadata;

/// Common manufacturer information page (Page 80)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerInfo {
    pub hw_revision: u8,
    pub manufacturer_id: u16,
    pub model_number: u16,
}

impl ManufacturerInfo {
    pub const PAGE: u8 = 80;

    pub fn parse(data: &[u8; 8]) -> Option<Self> {
        if data[0] != Self::PAGE {
            return None;
        }

        Some(Self {
            hw_revision: data[3],
            manufacturer_id: u16::from_le_bytes([data[4], data[5]]),
            model_number: u16::from_le_bytes([data[6], data[7]]),
        })
    }
}

/// Battery status page (Page 82)
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryStatus {
    /// Operating time in 2-second units
    pub operating_time: u32,
    /// Battery voltage in volts, `None` when the device does not report it
    pub battery_voltage: Option<f32>,
    pub battery_status: BatteryStatusValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatusValue {
    New,
    Good,
    Ok,
    Low,
    Critical,
    Invalid,
    Unknown(u8),
}

impl BatteryStatusValue {
    /// Decode the 3-bit descriptive status field.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            1 => Self::New,
            2 => Self::Good,
            3 => Self::Ok,
            4 => Self::Low,
            5 => Self::Critical,
            7 => Self::Invalid,
            x => Self::Unknown(x),
        }
    }

    /// Approximate charge level for display.
    pub fn percentage(&self) -> Option<u8> {
        match self {
            Self::New => Some(100),
            Self::Good => Some(80),
            Self::Ok => Some(50),
            Self::Low => Some(20),
            Self::Critical => Some(5),
            Self::Invalid | Self::Unknown(_) => None,
        }
    }
}

impl BatteryStatus {
    pub const PAGE: u8 = 82;

    pub fn parse(data: &[u8; 8]) -> Option<Self> {
        if data[0] != Self::PAGE {
            return None;
        }

        let operating_time = u32::from_le_bytes([data[3], data[4], data[5], 0]);
        let voltage_fractional = data[6];
        let descriptive = data[7];
        let voltage_coarse = descriptive & 0x0F;

        // Coarse voltage 0xF means "not used"
        let battery_voltage = (voltage_coarse != 0x0F)
            .then(|| f32::from(voltage_coarse) + f32::from(voltage_fractional) / 256.0);

        Some(Self {
            operating_time,
            battery_voltage,
            battery_status: BatteryStatusValue::from_bits(descriptive >> 4),
        })
    }
}

/// Parse the common pages carrying device information.
pub fn parse_common_page(data: &[u8; 8]) -> Option<DeviceMetadata> {
    match data[0] {
        ManufacturerInfo::PAGE => ManufacturerInfo::parse(data).map(|info| DeviceMetadata {
            manufacturer: Some(manufacturer_name(info.manufacturer_id)),
            battery_percentage: None,
        }),
        BatteryStatus::PAGE => {
            let status = BatteryStatus::parse(data)?;
            let percentage = status.battery_status.percentage()?;
            Some(DeviceMetadata {
                manufacturer: None,
                battery_percentage: Some(percentage),
            })
        }
        _ => None,
    }
}

/// Name for an ANT+ manufacturer identifier.
pub fn manufacturer_name(manufacturer_id: u16) -> String {
    let name = match manufacturer_id {
        1 => "Garmin",
        2 => "Garmin FR405 ANTFS",
        3 => "Zephyr",
        4 => "Dayton",
        5 => "IDT",
        6 => "SRM",
        7 => "Quarq",
        8 => "iBike",
        9 => "Saris",
        11 => "Tanita",
        13 => "Dynastream OEM",
        15 => "Dynastream",
        16 => "Timex",
        23 => "Suunto",
        32 => "Wahoo Fitness",
        40 => "Concept2",
        48 => "Pioneer",
        51 => "Stages Cycling",
        63 => "Specialized",
        68 => "Cateye",
        69 => "Stages Cycling",
        70 => "Sigmasport",
        76 => "Moxy",
        89 => "Tacx",
        95 => "Stryd",
        123 => "Polar",
        255 => "Development",
        other => return format!("Manufacturer {other}"),
    };
    name.to_string()
}
