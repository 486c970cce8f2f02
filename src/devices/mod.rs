//! Devices: owners of sensors.
//!
//! A device is composed of a [`DeviceCore`] (sensor map + lifecycle) and, for
//! remote devices, a search state and a protocol-specific
//! [`FrameDecoder`](remote::FrameDecoder).

pub mod ant;
pub mod base;
pub mod ble;
pub mod cycling;
pub mod local;
pub mod remote;
pub mod revolution;

use serde::{Deserialize, Serialize};

pub use base::{DeviceCore, LifecycleState};
pub use remote::{
    DecodeOutcome, DeviceMetadata, Frame, FrameDecoder, FrameOutcome, RemoteDevice,
    RemoteDeviceInfo, SearchState,
};
pub use revolution::{RevolutionCounter, RevolutionUpdate};

/// Stable, persisted identity of a remote device.
pub type DeviceId = i64;

/// Kind of device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Wall clock
    Clock,
    /// Satellite location provider
    Gps,
    /// Fused location provider
    FusedLocation,
    /// Network location provider
    NetworkLocation,
    /// Barometric altitude
    AltitudeFromPressure,
    /// Vertical speed and slope derived from altitude and distance
    VerticalSpeedAndSlope,
    /// Heart rate monitor
    HeartRate,
    /// Wheel speed sensor
    BikeSpeed,
    /// Crank cadence sensor
    BikeCadence,
    /// Combined speed and cadence sensor
    BikeSpeedAndCadence,
    /// Power meter
    BikePower,
    /// Stride based running speed sensor
    RunSpeed,
}

impl DeviceType {
    /// Whether devices of this type are found through a protocol search.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            DeviceType::HeartRate
                | DeviceType::BikeSpeed
                | DeviceType::BikeCadence
                | DeviceType::BikeSpeedAndCadence
                | DeviceType::BikePower
                | DeviceType::RunSpeed
        )
    }

    /// Sport this device type is specific to; `None` for sport-neutral devices.
    pub fn sport_type(&self) -> Option<SportType> {
        match self {
            DeviceType::BikeSpeed
            | DeviceType::BikeCadence
            | DeviceType::BikeSpeedAndCadence
            | DeviceType::BikePower => Some(SportType::Bike),
            DeviceType::RunSpeed => Some(SportType::Run),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Clock => write!(f, "Clock"),
            DeviceType::Gps => write!(f, "GPS"),
            DeviceType::FusedLocation => write!(f, "Fused Location"),
            DeviceType::NetworkLocation => write!(f, "Network Location"),
            DeviceType::AltitudeFromPressure => write!(f, "Altitude from Pressure"),
            DeviceType::VerticalSpeedAndSlope => write!(f, "Vertical Speed and Slope"),
            DeviceType::HeartRate => write!(f, "Heart Rate"),
            DeviceType::BikeSpeed => write!(f, "Bike Speed"),
            DeviceType::BikeCadence => write!(f, "Bike Cadence"),
            DeviceType::BikeSpeedAndCadence => write!(f, "Bike Speed/Cadence"),
            DeviceType::BikePower => write!(f, "Bike Power"),
            DeviceType::RunSpeed => write!(f, "Run Speed"),
        }
    }
}

/// Wire protocol of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    AntPlus,
    BluetoothLe,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::AntPlus => write!(f, "ANT+"),
            Protocol::BluetoothLe => write!(f, "Bluetooth LE"),
        }
    }
}

/// Sport a workout (or a device) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SportType {
    Bike,
    Run,
    #[default]
    Other,
}

/// Key under which a device owns sensors in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKey {
    /// Local devices exist at most once per type
    Local(DeviceType),
    Remote(DeviceId),
}

/// Common device contract.
pub trait Device: Send {
    fn name(&self) -> String;

    fn core(&self) -> &DeviceCore;

    fn core_mut(&mut self) -> &mut DeviceCore;

    fn device_type(&self) -> DeviceType {
        self.core().device_type()
    }

    /// Start a new lap: reset lap-scoped accumulators.
    fn new_lap(&mut self) {
        self.core().new_lap();
    }

    /// Unregister sensors and release every subscription. Idempotent.
    fn shut_down(&mut self) {
        self.core_mut().shut_down();
    }
}
