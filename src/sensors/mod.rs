//! Sensor value cells, accumulators and the registry of visible sensors.

pub mod accumulator;
pub mod deferred;
pub mod registry;
pub mod sensor;
pub mod types;

pub use accumulator::{Accumulate, AccumulatorSensor, LapReset};
pub use deferred::DeferredNotifications;
pub use registry::{RegisteredSensor, SensorRegistry};
pub use sensor::{ListenerId, Sensor, SensorHandle, SensorValue};
pub use types::{SensorError, SensorType, SensorValueType};
