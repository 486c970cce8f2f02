//! Barometric altitude device.

use crate::devices::{Device, DeviceCore, DeviceKey, DeviceType};
use crate::sensors::{Sensor, SensorRegistry, SensorType};
use std::sync::Arc;

/// International barometric formula: altitude in metres for a pressure `p`
/// against the sea level reference `p0` (both hPa).
pub fn pressure_to_altitude(pressure_hpa: f64, sea_level_hpa: f64) -> f64 {
    44_330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(1.0 / 5.255))
}

/// Air pressure and the altitude derived from it.
///
/// Registers with the first pressure reading.
#[derive(Debug)]
pub struct AltitudeFromPressureDevice {
    sea_level_hpa: f64,
    pressure: Arc<Sensor<f64>>,
    altitude: Arc<Sensor<f64>>,
    core: DeviceCore,
}

impl AltitudeFromPressureDevice {
    pub fn new(registry: Arc<SensorRegistry>, sea_level_hpa: f64) -> Self {
        let device_type = DeviceType::AltitudeFromPressure;
        let mut core = DeviceCore::new(DeviceKey::Local(device_type), device_type, registry);
        let pressure = core.add_sensor(SensorType::AirPressure);
        let altitude = core.add_sensor(SensorType::Altitude);
        core.sensors_added();

        Self {
            sea_level_hpa,
            pressure,
            altitude,
            core,
        }
    }

    pub fn on_pressure(&mut self, pressure_hpa: f64) {
        if self.core.is_shut_down() {
            return;
        }
        if !pressure_hpa.is_finite() || pressure_hpa <= 0.0 {
            tracing::debug!("Ignoring pressure reading {}", pressure_hpa);
            return;
        }

        if !self.core.is_registered() {
            self.core.register_sensors();
        }

        self.pressure.new_value(pressure_hpa);
        self.altitude
            .new_value(pressure_to_altitude(pressure_hpa, self.sea_level_hpa));
    }

    pub fn set_sea_level_pressure(&mut self, sea_level_hpa: f64) {
        self.sea_level_hpa = sea_level_hpa;
    }
}

impl Device for AltitudeFromPressureDevice {
    fn name(&self) -> String {
        "Barometer".to_string()
    }

    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }
}
