//! Wall clock device.

use crate::devices::{Device, DeviceCore, DeviceKey, DeviceType};
use crate::sensors::{Sensor, SensorRegistry, SensorType};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

const TICK: Duration = Duration::from_secs(1);

/// Publishes the local time of day once per second. Always registered.
#[derive(Debug)]
pub struct ClockDevice {
    time_of_day: Arc<Sensor<String>>,
    core: DeviceCore,
}

impl ClockDevice {
    pub fn new(registry: Arc<SensorRegistry>) -> Self {
        let mut core = DeviceCore::new(DeviceKey::Local(DeviceType::Clock), DeviceType::Clock, registry);
        let time_of_day = core.add_sensor(SensorType::TimeOfDay);
        core.sensors_added();
        core.register_sensors();

        let device = Self { time_of_day, core };
        device.tick();
        device
    }

    /// Start the periodic tick. The task is aborted on shutdown.
    pub fn start(&mut self, handle: &Handle) {
        let sensor = self.time_of_day.clone();
        let task = handle.spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            loop {
                interval.tick().await;
                if sensor.is_active() {
                    sensor.new_value(format_time_of_day(chrono::Local::now()));
                }
            }
        });
        self.core.on_release(move || task.abort());
    }

    pub fn tick(&self) {
        if self.core.is_registered() {
            self.time_of_day
                .new_value(format_time_of_day(chrono::Local::now()));
        }
    }
}

fn format_time_of_day<Tz>(now: chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    now.format("%H:%M:%S").to_string()
}

impl Device for ClockDevice {
    fn name(&self) -> String {
        "Clock".to_string()
    }

    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }
}
