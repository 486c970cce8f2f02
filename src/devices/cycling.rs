//! Wheel and crank revolution channels shared by BLE and ANT+ bike devices.

use crate::devices::revolution::{RevolutionCounter, RevolutionUpdate};
use crate::devices::DeviceCore;
use crate::sensors::{AccumulatorSensor, Sensor, SensorType};
use std::sync::Arc;

/// Wheel revolutions → speed, pace, distance and lap distance.
///
/// The calibration factor is the distance covered per wheel revolution
/// (circumference in metres).
#[derive(Debug)]
pub struct WheelChannel {
    counter: RevolutionCounter,
    calibration_factor: f64,
    speed: Arc<Sensor<f64>>,
    pace: Arc<Sensor<f64>>,
    distance: Arc<AccumulatorSensor<f64>>,
    lap_distance: Arc<AccumulatorSensor<f64>>,
    distance_offset: f64,
}

impl WheelChannel {
    pub fn new(core: &mut DeviceCore, counter: RevolutionCounter, calibration_factor: f64) -> Self {
        Self {
            counter,
            calibration_factor,
            speed: core.add_sensor(SensorType::SpeedMps),
            pace: core.add_sensor(SensorType::PaceSpm),
            distance: core.add_accumulator(SensorType::DistanceM, 0.0, false),
            lap_distance: core.add_accumulator(SensorType::LapDistanceM, 0.0, true),
            distance_offset: 0.0,
        }
    }

    pub fn set_calibration_factor(&mut self, calibration_factor: f64) {
        self.calibration_factor = calibration_factor;
    }

    pub fn calibration_factor(&self) -> f64 {
        self.calibration_factor
    }

    /// Drop the reference sample; lifetime distance continues from its total.
    pub fn reset(&mut self) {
        self.counter.reset();
        self.distance_offset = self.distance.total();
    }

    /// Feed one wheel sample.
    pub fn update(&mut self, cumulative_revs: u32, event_time: u16) -> RevolutionUpdate {
        let update = self.counter.update(cumulative_revs, event_time);

        match update {
            RevolutionUpdate::Initialized | RevolutionUpdate::Stale { .. } => {}
            RevolutionUpdate::Rate {
                rev_diff,
                revs_per_second,
                total_revs,
            } => {
                let speed = self.calibration_factor * revs_per_second;
                self.speed.new_value(speed);

                // Zero revolutions would give an infinite pace.
                if rev_diff != 0 && speed > 0.0 {
                    self.pace.new_value(1.0 / speed);
                }

                self.distance
                    .new_value(self.distance_offset + self.calibration_factor * total_revs as f64);
                self.lap_distance
                    .increment(self.calibration_factor * f64::from(rev_diff));
            }
            RevolutionUpdate::Stopped => {
                tracing::debug!("Wheel stopped, forcing speed to zero");
                self.speed.new_value(0.0);
                self.pace.clear_value();
            }
        }

        update
    }
}

/// Crank revolutions → cadence.
#[derive(Debug)]
pub struct CrankChannel {
    counter: RevolutionCounter,
    cadence: Arc<Sensor<i32>>,
}

impl CrankChannel {
    pub fn new(core: &mut DeviceCore, counter: RevolutionCounter) -> Self {
        Self {
            counter,
            cadence: core.add_sensor(SensorType::Cadence),
        }
    }

    pub fn reset(&mut self) {
        self.counter.reset();
    }

    /// Feed one crank sample.
    pub fn update(&mut self, cumulative_revs: u32, event_time: u16) -> RevolutionUpdate {
        let update = self.counter.update(cumulative_revs, event_time);

        match update {
            RevolutionUpdate::Rate {
                revs_per_second, ..
            } => {
                self.cadence.new_value((60.0 * revs_per_second).round() as i32);
            }
            RevolutionUpdate::Stopped => {
                tracing::debug!("Crank stopped, forcing cadence to zero");
                self.cadence.new_value(0);
            }
            RevolutionUpdate::Initialized | RevolutionUpdate::Stale { .. } => {}
        }

        update
    }
}
