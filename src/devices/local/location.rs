//! Location provider devices (GPS, fused, network).

use crate::devices::{Device, DeviceCore, DeviceKey, DeviceType};
use crate::sensors::{AccumulatorSensor, Sensor, SensorRegistry, SensorType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Source of location fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationProvider {
    Gps,
    Fused,
    Network,
}

impl LocationProvider {
    pub const ALL: [LocationProvider; 3] = [
        LocationProvider::Gps,
        LocationProvider::Fused,
        LocationProvider::Network,
    ];

    pub fn device_type(&self) -> DeviceType {
        match self {
            LocationProvider::Gps => DeviceType::Gps,
            LocationProvider::Fused => DeviceType::FusedLocation,
            LocationProvider::Network => DeviceType::NetworkLocation,
        }
    }
}

impl std::fmt::Display for LocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationProvider::Gps => write!(f, "GPS"),
            LocationProvider::Fused => write!(f, "Fused"),
            LocationProvider::Network => write!(f, "Network"),
        }
    }
}

/// One fix reported by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres
    pub accuracy_m: f64,
    pub altitude_m: Option<f64>,
    pub bearing_deg: Option<f64>,
    pub speed_mps: Option<f64>,
    pub time: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, time: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            altitude_m: None,
            bearing_deg: None,
            speed_mps: None,
            time,
        }
    }
}

/// Great-circle distance in metres between two points.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS: f64 = 6_371_000.0; // meters

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS * c
}

/// Position, speed and travelled distance from one provider.
///
/// Sensors are registered with the first fix whose accuracy is within the
/// threshold and unregistered when the provider is disabled. Less accurate
/// fixes are dropped. Latitude and longitude are updated one after the other,
/// so a concurrent reader may briefly see a mixed pair.
#[derive(Debug)]
pub struct LocationDevice {
    provider: LocationProvider,
    accuracy_threshold_m: f64,
    latitude: Arc<Sensor<f64>>,
    longitude: Arc<Sensor<f64>>,
    accuracy: Arc<Sensor<f64>>,
    altitude: Arc<Sensor<f64>>,
    bearing: Arc<Sensor<f64>>,
    speed: Arc<Sensor<f64>>,
    distance: Arc<AccumulatorSensor<f64>>,
    lap_distance: Arc<AccumulatorSensor<f64>>,
    last_fix: Option<LocationFix>,
    core: DeviceCore,
}

impl LocationDevice {
    pub fn new(
        provider: LocationProvider,
        registry: Arc<SensorRegistry>,
        accuracy_threshold_m: f64,
    ) -> Self {
        let device_type = provider.device_type();
        let mut core = DeviceCore::new(DeviceKey::Local(device_type), device_type, registry);

        let latitude = core.add_sensor(SensorType::Latitude);
        let longitude = core.add_sensor(SensorType::Longitude);
        let accuracy = core.add_sensor(SensorType::Accuracy);
        let altitude = core.add_sensor(SensorType::AltitudeGps);
        let bearing = core.add_sensor(SensorType::Bearing);
        let speed = core.add_sensor(SensorType::SpeedMps);
        let distance = core.add_accumulator(SensorType::DistanceM, 0.0, false);
        let lap_distance = core.add_accumulator(SensorType::LapDistanceM, 0.0, true);
        core.sensors_added();

        Self {
            provider,
            accuracy_threshold_m,
            latitude,
            longitude,
            accuracy,
            altitude,
            bearing,
            speed,
            distance,
            lap_distance,
            last_fix: None,
            core,
        }
    }

    pub fn provider(&self) -> LocationProvider {
        self.provider
    }

    /// Whether fixes of this accuracy make the location available.
    pub fn is_accurate(&self, fix: &LocationFix) -> bool {
        fix.accuracy_m.is_finite() && fix.accuracy_m <= self.accuracy_threshold_m
    }

    pub fn on_location(&mut self, fix: LocationFix) {
        if self.core.is_shut_down() {
            return;
        }
        if !self.is_accurate(&fix) {
            tracing::debug!(
                "{} fix with accuracy {:.0} m dropped (threshold {:.0} m)",
                self.provider,
                fix.accuracy_m,
                self.accuracy_threshold_m
            );
            return;
        }

        if !self.core.is_registered() {
            tracing::info!("{} location available", self.provider);
            self.core.register_sensors();
        }

        let mut derived_speed = None;
        if let Some(last) = &self.last_fix {
            let delta =
                haversine_distance(last.latitude, last.longitude, fix.latitude, fix.longitude);
            self.distance.increment(delta);
            self.lap_distance.increment(delta);

            let elapsed = (fix.time - last.time).num_milliseconds();
            if elapsed > 0 {
                derived_speed = Some(delta * 1000.0 / elapsed as f64);
            }
        } else {
            // Publish the current totals so distance reads as zero, not unknown.
            self.distance.increment(0.0);
            self.lap_distance.increment(0.0);
        }

        self.latitude.new_value(fix.latitude);
        self.longitude.new_value(fix.longitude);
        self.accuracy.new_value(fix.accuracy_m);
        if let Some(altitude) = fix.altitude_m {
            self.altitude.new_value(altitude);
        }
        if let Some(bearing) = fix.bearing_deg {
            self.bearing.new_value(bearing);
        }
        if let Some(speed) = fix.speed_mps.or(derived_speed) {
            self.speed.new_value(speed);
        }

        self.last_fix = Some(fix);
    }

    /// The user or the platform toggled the provider.
    pub fn set_provider_enabled(&mut self, enabled: bool) {
        if enabled {
            tracing::debug!("{} provider enabled, waiting for a fix", self.provider);
            return;
        }

        tracing::info!("{} provider disabled", self.provider);
        self.last_fix = None;
        self.core.unregister_sensors();
    }
}

impl Device for LocationDevice {
    fn name(&self) -> String {
        format!("{} Location", self.provider)
    }

    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }
}
