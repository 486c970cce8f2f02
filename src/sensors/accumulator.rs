//! Running-total sensors that can be reset at lap boundaries.

use crate::sensors::sensor::{Sensor, SensorValue};
use crate::sensors::types::SensorType;
use std::ops::Add;
use std::sync::{Arc, Mutex};

/// Values that can be summed into a running total.
pub trait Accumulate: SensorValue + Copy + Add<Output = Self> {}

impl Accumulate for i32 {}
impl Accumulate for f64 {}

/// Reset hook invoked on lap boundaries.
pub trait LapReset: Send + Sync {
    fn reset(&self);
}

/// A sensor holding a running total.
///
/// The total must be non-decreasing between resets. Callers own that
/// invariant: they compute deltas and add them with [`increment`](Self::increment).
#[derive(Debug)]
pub struct AccumulatorSensor<T: Accumulate> {
    sensor: Arc<Sensor<T>>,
    initial: T,
    lap_scoped: bool,
    // Total kept outside the sensor so it survives deactivation.
    total: Mutex<T>,
}

impl<T: Accumulate> AccumulatorSensor<T> {
    pub fn new(sensor_type: SensorType, initial: T, lap_scoped: bool) -> Self {
        Self {
            sensor: Arc::new(Sensor::new(sensor_type)),
            initial,
            lap_scoped,
            total: Mutex::new(initial),
        }
    }

    /// The observable sensor cell behind this accumulator.
    pub fn sensor(&self) -> &Arc<Sensor<T>> {
        &self.sensor
    }

    /// Whether [`LapReset::reset`] is applied on every new lap.
    pub fn is_lap_scoped(&self) -> bool {
        self.lap_scoped
    }

    /// Add a delta to the running total and publish it.
    pub fn increment(&self, delta: T) {
        let total = {
            let mut total = self.total.lock().unwrap_or_else(|e| e.into_inner());
            *total = *total + delta;
            *total
        };
        self.sensor.new_value(total);
    }

    /// Publish an externally computed total.
    pub fn new_value(&self, value: T) {
        *self.total.lock().unwrap_or_else(|e| e.into_inner()) = value;
        self.sensor.new_value(value);
    }

    /// Restore the configured initial value.
    pub fn reset(&self) {
        self.reset_to(self.initial);
    }

    /// Restore an explicit value.
    pub fn reset_to(&self, value: T) {
        *self.total.lock().unwrap_or_else(|e| e.into_inner()) = value;
        if self.sensor.is_active() {
            self.sensor.new_value(value);
        }
    }

    /// Current total, independent of the sensor's activation.
    pub fn total(&self) -> T {
        *self.total.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Value as observed through the sensor.
    pub fn value(&self) -> Option<T> {
        self.sensor.value()
    }
}

impl<T: Accumulate> LapReset for AccumulatorSensor<T> {
    fn reset(&self) {
        AccumulatorSensor::reset(self);
    }
}
