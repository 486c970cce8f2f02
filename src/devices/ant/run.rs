//! ANT+ Stride-based Speed and Distance Monitor (Device Type 124)

use crate::devices::ant::pages::parse_common_page;
use crate::devices::ant::{page_number, PageDecoder};
use crate::devices::remote::DecodeOutcome;
use crate::devices::DeviceCore;
use crate::sensors::{AccumulatorSensor, Sensor, SensorType};
use std::sync::Arc;

/// Speed/distance data (page 1) or speed/cadence data (page 2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StrideSpeedPage {
    Distance {
        /// Distance in metres (wraps at 256)
        distance_m: f64,
        speed_mps: f64,
        stride_count: u8,
    },
    Cadence {
        cadence_spm: f64,
        speed_mps: f64,
    },
}

impl StrideSpeedPage {
    pub fn parse(data: &[u8; 8]) -> Option<Self> {
        match page_number(data) {
            1 => Some(Self::Distance {
                distance_m: f64::from(data[3]) + f64::from(data[4] >> 4) / 16.0,
                speed_mps: f64::from(data[4] & 0x0F) + f64::from(data[5]) / 256.0,
                stride_count: data[6],
            }),
            2 => Some(Self::Cadence {
                cadence_spm: f64::from(data[3]) + f64::from(data[4] >> 4) / 16.0,
                speed_mps: f64::from(data[4] & 0x0F) + f64::from(data[5]) / 256.0,
            }),
            _ => None,
        }
    }
}

/// Speed, pace, cadence and distance from a foot pod.
#[derive(Debug)]
pub struct StrideSpeedDecoder {
    calibration_factor: f64,
    speed: Arc<Sensor<f64>>,
    pace: Arc<Sensor<f64>>,
    cadence: Arc<Sensor<i32>>,
    distance: Arc<AccumulatorSensor<f64>>,
    lap_distance: Arc<AccumulatorSensor<f64>>,
    last_distance_m: Option<f64>,
}

impl StrideSpeedDecoder {
    pub fn new(core: &mut DeviceCore, calibration_factor: f64) -> Self {
        Self {
            calibration_factor,
            speed: core.add_sensor(SensorType::SpeedMps),
            pace: core.add_sensor(SensorType::PaceSpm),
            cadence: core.add_sensor(SensorType::Cadence),
            distance: core.add_accumulator(SensorType::DistanceM, 0.0, false),
            lap_distance: core.add_accumulator(SensorType::LapDistanceM, 0.0, true),
            last_distance_m: None,
        }
    }

    fn speed(&self, speed_mps: f64) {
        let speed = self.calibration_factor * speed_mps;
        self.speed.new_value(speed);
        if speed > 0.0 {
            self.pace.new_value(1.0 / speed);
        } else {
            self.pace.clear_value();
        }
    }
}

impl PageDecoder for StrideSpeedDecoder {
    fn decode_page(&mut self, page: &[u8; 8]) -> DecodeOutcome {
        match StrideSpeedPage::parse(page) {
            Some(StrideSpeedPage::Distance {
                distance_m,
                speed_mps,
                ..
            }) => {
                self.speed(speed_mps);
                if let Some(last) = self.last_distance_m {
                    let delta = (distance_m - last).rem_euclid(256.0) * self.calibration_factor;
                    self.distance.increment(delta);
                    self.lap_distance.increment(delta);
                }
                self.last_distance_m = Some(distance_m);
                DecodeOutcome::Measurement
            }
            Some(StrideSpeedPage::Cadence {
                cadence_spm,
                speed_mps,
            }) => {
                self.speed(speed_mps);
                self.cadence.new_value(cadence_spm.round() as i32);
                DecodeOutcome::Measurement
            }
            None => match parse_common_page(page) {
                Some(metadata) => DecodeOutcome::Metadata(metadata),
                None => DecodeOutcome::Ignored,
            },
        }
    }

    fn set_calibration_factor(&mut self, calibration_factor: f64) {
        self.calibration_factor = calibration_factor;
    }

    fn reset(&mut self) {
        self.last_distance_m = None;
    }
}
