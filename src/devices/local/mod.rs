//! Devices backed by the host rather than a radio link.
//!
//! The clock is always present. Location devices exist per enabled provider
//! and only when location permission was granted; the pressure altitude
//! device only with a barometer. A device that cannot be created is simply
//! absent.

pub mod altitude;
pub mod clock;
pub mod location;
pub mod vertical_speed;

use crate::devices::{Device, DeviceType};
use crate::sensors::SensorRegistry;
use crate::storage::config::{AltitudeSettings, LocationSettings};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Handle;

pub use altitude::{pressure_to_altitude, AltitudeFromPressureDevice};
pub use clock::ClockDevice;
pub use location::{haversine_distance, LocationDevice, LocationFix, LocationProvider};
pub use vertical_speed::{SlopeSampler, VerticalSpeedAndSlopeDevice};

/// What the host platform offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub location_permission: bool,
    pub gps_provider: bool,
    pub fused_provider: bool,
    pub network_provider: bool,
    pub pressure_sensor: bool,
}

impl Capabilities {
    /// Nothing but the clock.
    pub fn none() -> Self {
        Self {
            location_permission: false,
            gps_provider: false,
            fused_provider: false,
            network_provider: false,
            pressure_sensor: false,
        }
    }

    pub fn all() -> Self {
        Self {
            location_permission: true,
            gps_provider: true,
            fused_provider: true,
            network_provider: true,
            pressure_sensor: true,
        }
    }

    fn provider(&self, provider: LocationProvider) -> bool {
        match provider {
            LocationProvider::Gps => self.gps_provider,
            LocationProvider::Fused => self.fused_provider,
            LocationProvider::Network => self.network_provider,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::none()
    }
}

/// The set of local devices owned by the device manager.
#[derive(Debug, Default)]
pub struct LocalDevices {
    clock: Option<ClockDevice>,
    locations: BTreeMap<LocationProvider, LocationDevice>,
    altitude: Option<AltitudeFromPressureDevice>,
    vertical_speed: Option<VerticalSpeedAndSlopeDevice>,
}

impl LocalDevices {
    /// Create every local device the platform supports.
    ///
    /// Periodic devices are started on `runtime` when one is given; without
    /// it they only update on an explicit tick.
    pub fn create(
        capabilities: Capabilities,
        location: &LocationSettings,
        altitude: &AltitudeSettings,
        registry: &Arc<SensorRegistry>,
        runtime: Option<&Handle>,
    ) -> Self {
        let mut devices = Self::default();

        let mut clock = ClockDevice::new(registry.clone());
        if let Some(handle) = runtime {
            clock.start(handle);
        }
        devices.clock = Some(clock);

        for provider in LocationProvider::ALL {
            if !location.is_enabled(provider) {
                continue;
            }
            if !capabilities.location_permission {
                tracing::info!("No location permission, skipping {} device", provider);
                continue;
            }
            if !capabilities.provider(provider) {
                tracing::info!("{} provider unavailable", provider);
                continue;
            }
            devices.locations.insert(
                provider,
                LocationDevice::new(provider, registry.clone(), location.accuracy_threshold_m),
            );
        }

        if capabilities.pressure_sensor {
            devices.altitude = Some(AltitudeFromPressureDevice::new(
                registry.clone(),
                altitude.sea_level_pressure_hpa,
            ));
        } else {
            tracing::info!("No pressure sensor, altitude from pressure unavailable");
        }

        if devices.altitude.is_some() || !devices.locations.is_empty() {
            let mut vertical = VerticalSpeedAndSlopeDevice::new(registry.clone(), altitude);
            if let Some(handle) = runtime {
                vertical.start(handle, altitude.sample_interval());
            }
            devices.vertical_speed = Some(vertical);
        }

        tracing::info!("Created local devices: {:?}", devices.device_types());
        devices
    }

    pub fn device_types(&self) -> Vec<DeviceType> {
        self.iter().map(|d| d.device_type()).collect()
    }

    pub fn clock(&self) -> Option<&ClockDevice> {
        self.clock.as_ref()
    }

    pub fn location_mut(&mut self, provider: LocationProvider) -> Option<&mut LocationDevice> {
        self.locations.get_mut(&provider)
    }

    pub fn altitude_mut(&mut self) -> Option<&mut AltitudeFromPressureDevice> {
        self.altitude.as_mut()
    }

    pub fn vertical_speed(&self) -> Option<&VerticalSpeedAndSlopeDevice> {
        self.vertical_speed.as_ref()
    }

    /// Local devices with registered sensors.
    pub fn active_device_types(&self) -> Vec<DeviceType> {
        self.iter()
            .filter(|d| d.core().is_registered())
            .map(|d| d.device_type())
            .collect()
    }

    pub fn new_lap(&mut self) {
        self.for_each_mut(|device| device.new_lap());
    }

    pub fn shut_down(&mut self) {
        self.for_each_mut(|device| device.shut_down());
    }

    fn iter(&self) -> impl Iterator<Item = &dyn Device> {
        self.clock
            .iter()
            .map(|d| d as &dyn Device)
            .chain(self.locations.values().map(|d| d as &dyn Device))
            .chain(self.altitude.iter().map(|d| d as &dyn Device))
            .chain(self.vertical_speed.iter().map(|d| d as &dyn Device))
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(&mut dyn Device)) {
        if let Some(clock) = self.clock.as_mut() {
            f(clock);
        }
        for location in self.locations.values_mut() {
            f(location);
        }
        if let Some(altitude) = self.altitude.as_mut() {
            f(altitude);
        }
        if let Some(vertical_speed) = self.vertical_speed.as_mut() {
            f(vertical_speed);
        }
    }
}
