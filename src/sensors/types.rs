//! Sensor types and value kinds.
//!
//! Every measurement the device layer produces is identified by a [`SensorType`],
//! and every sensor type has exactly one [`SensorValueType`] describing how its
//! samples are represented.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of physical or derived measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    /// Heart rate in beats per minute
    HeartRate,
    /// Crank cadence in revolutions per minute
    Cadence,
    /// Instantaneous power in watts
    Power,
    /// Speed in metres per second
    SpeedMps,
    /// Pace in seconds per metre
    PaceSpm,
    /// Lifetime distance in metres
    DistanceM,
    /// Distance in metres since the last lap boundary
    LapDistanceM,
    /// Wall clock time of day
    TimeOfDay,
    /// Latitude in degrees
    Latitude,
    /// Longitude in degrees
    Longitude,
    /// Location accuracy in metres
    Accuracy,
    /// Altitude reported by a location provider, in metres
    AltitudeGps,
    /// Bearing in degrees
    Bearing,
    /// Air pressure in hPa
    AirPressure,
    /// Barometric altitude in metres
    Altitude,
    /// Vertical speed in metres per second
    VerticalSpeed,
    /// Slope in percent
    Slope,
}

impl SensorType {
    /// Representation of samples of this type.
    pub fn value_type(&self) -> SensorValueType {
        match self {
            SensorType::HeartRate | SensorType::Cadence | SensorType::Power => {
                SensorValueType::Integer
            }
            SensorType::TimeOfDay => SensorValueType::Text,
            _ => SensorValueType::Double,
        }
    }

    /// Unit suffix used when displaying values.
    pub fn unit(&self) -> &'static str {
        match self {
            SensorType::HeartRate => "bpm",
            SensorType::Cadence => "rpm",
            SensorType::Power => "W",
            SensorType::SpeedMps | SensorType::VerticalSpeed => "m/s",
            SensorType::PaceSpm => "s/m",
            SensorType::DistanceM
            | SensorType::LapDistanceM
            | SensorType::Accuracy
            | SensorType::AltitudeGps
            | SensorType::Altitude => "m",
            SensorType::Latitude | SensorType::Longitude | SensorType::Bearing => "°",
            SensorType::AirPressure => "hPa",
            SensorType::Slope => "%",
            SensorType::TimeOfDay => "",
        }
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorType::HeartRate => write!(f, "Heart Rate"),
            SensorType::Cadence => write!(f, "Cadence"),
            SensorType::Power => write!(f, "Power"),
            SensorType::SpeedMps => write!(f, "Speed"),
            SensorType::PaceSpm => write!(f, "Pace"),
            SensorType::DistanceM => write!(f, "Distance"),
            SensorType::LapDistanceM => write!(f, "Lap Distance"),
            SensorType::TimeOfDay => write!(f, "Time of Day"),
            SensorType::Latitude => write!(f, "Latitude"),
            SensorType::Longitude => write!(f, "Longitude"),
            SensorType::Accuracy => write!(f, "Accuracy"),
            SensorType::AltitudeGps => write!(f, "GPS Altitude"),
            SensorType::Bearing => write!(f, "Bearing"),
            SensorType::AirPressure => write!(f, "Air Pressure"),
            SensorType::Altitude => write!(f, "Altitude"),
            SensorType::VerticalSpeed => write!(f, "Vertical Speed"),
            SensorType::Slope => write!(f, "Slope"),
        }
    }
}

/// Underlying representation of a sensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorValueType {
    Integer,
    Double,
    Text,
}

/// Errors that can occur in the sensor system.
#[derive(Debug, Error)]
pub enum SensorError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Device not found during search
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Connection to device failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe to device notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Device has no usable address for its protocol
    #[error("No address for device {0}")]
    MissingAddress(i64),

    /// Unsupported device type / protocol combination
    #[error("Unsupported device: {0}")]
    Unsupported(String),

    /// Persistence collaborator failed
    #[error("Store error: {0}")]
    Store(#[from] crate::storage::StoreError),

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
