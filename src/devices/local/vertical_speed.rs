//! Vertical speed and slope derived from other devices' sensors.

use crate::devices::{Device, DeviceCore, DeviceKey, DeviceType};
use crate::sensors::{Sensor, SensorRegistry, SensorType};
use crate::storage::config::AltitudeSettings;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    altitude: Option<f64>,
    distance: Option<f64>,
}

/// Windowed altitude/distance history.
///
/// Altitude is read from the barometer when registered, otherwise from a
/// location provider. Distance comes from whichever device provides it first.
#[derive(Debug)]
pub struct SlopeSampler {
    registry: Arc<SensorRegistry>,
    window: Duration,
    min_slope_distance_m: f64,
    samples: VecDeque<Sample>,
    vertical_speed: Arc<Sensor<f64>>,
    slope: Arc<Sensor<f64>>,
}

impl SlopeSampler {
    fn read(&self, sensor_type: SensorType) -> Option<f64> {
        self.registry
            .first_active(sensor_type)
            .and_then(|h| h.as_double().and_then(|s| s.value()))
    }

    /// Take one sample and update vertical speed and slope.
    pub fn sample_at(&mut self, at: Instant) {
        let altitude = self
            .read(SensorType::Altitude)
            .or_else(|| self.read(SensorType::AltitudeGps));
        let distance = self.read(SensorType::DistanceM);

        self.samples.push_back(Sample {
            at,
            altitude,
            distance,
        });
        while self
            .samples
            .front()
            .is_some_and(|s| at.saturating_duration_since(s.at) > self.window)
        {
            self.samples.pop_front();
        }

        let Some(altitude) = altitude else {
            self.vertical_speed.clear_value();
            self.slope.clear_value();
            return;
        };

        // Oldest sample in the window that had an altitude
        if let Some((from, since)) = self
            .samples
            .iter()
            .find_map(|s| s.altitude.map(|a| (a, s.at)))
        {
            let elapsed = at.saturating_duration_since(since).as_secs_f64();
            if elapsed > 0.0 {
                self.vertical_speed.new_value((altitude - from) / elapsed);
            }
        }

        let travelled = distance.and_then(|distance| {
            self.samples.iter().find_map(|s| match (s.altitude, s.distance) {
                (Some(a), Some(d)) => Some((altitude - a, distance - d)),
                _ => None,
            })
        });

        match travelled {
            Some((climb, travelled)) if travelled >= self.min_slope_distance_m => {
                self.slope.new_value(climb / travelled * 100.0);
            }
            _ => self.slope.clear_value(),
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

/// Periodically samples altitude and distance. Registered from creation on;
/// values stay undefined until the window has enough data.
#[derive(Debug)]
pub struct VerticalSpeedAndSlopeDevice {
    sampler: Arc<Mutex<SlopeSampler>>,
    core: DeviceCore,
}

impl VerticalSpeedAndSlopeDevice {
    pub fn new(registry: Arc<SensorRegistry>, settings: &AltitudeSettings) -> Self {
        let device_type = DeviceType::VerticalSpeedAndSlope;
        let mut core =
            DeviceCore::new(DeviceKey::Local(device_type), device_type, registry.clone());
        let vertical_speed = core.add_sensor(SensorType::VerticalSpeed);
        let slope = core.add_sensor(SensorType::Slope);
        core.sensors_added();
        core.register_sensors();

        let sampler = SlopeSampler {
            registry,
            window: settings.window(),
            min_slope_distance_m: settings.min_slope_distance_m,
            samples: VecDeque::new(),
            vertical_speed,
            slope,
        };

        Self {
            sampler: Arc::new(Mutex::new(sampler)),
            core,
        }
    }

    /// Start periodic sampling. The task is aborted on shutdown.
    pub fn start(&mut self, handle: &Handle, period: Duration) {
        let sampler = self.sampler.clone();
        let task = handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                sampler
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .sample_at(Instant::now());
            }
        });
        self.core.on_release(move || task.abort());
    }

    pub fn sample_at(&self, at: Instant) {
        if self.core.is_registered() {
            self.sampler
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .sample_at(at);
        }
    }
}

impl Device for VerticalSpeedAndSlopeDevice {
    fn name(&self) -> String {
        "Vertical Speed and Slope".to_string()
    }

    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    fn shut_down(&mut self) {
        self.core.shut_down();
        self.sampler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
    }
}
