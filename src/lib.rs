//! TrainingTracker - sensor and device core
//!
//! Aggregates ANT+ and Bluetooth LE sensors (heart rate, cadence, speed,
//! power), location providers and derived metrics (pressure altitude,
//! vertical speed, slope) into typed, observable sensors, and manages the
//! search for paired remote devices.

pub mod devices;
pub mod events;
pub mod manager;
pub mod sensors;
pub mod storage;
pub mod transport;

// Re-export commonly used types
pub use devices::{DeviceId, DeviceType, Frame, Protocol, SportType};
pub use events::{DeviceEvent, EventBus, SettingsEvent};
pub use manager::{DeviceManager, InvariantViolation};
pub use sensors::{Sensor, SensorRegistry, SensorType};
pub use storage::config::AppConfig;
