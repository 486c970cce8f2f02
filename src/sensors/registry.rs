//! Registry of sensors currently visible to consumers.
//!
//! A device's sensors only appear here while the device is registered. Several
//! devices may provide the same sensor type (e.g. speed from a wheel sensor and
//! from GPS); the registry keeps them in registration order.

use crate::devices::DeviceKey;
use crate::events::{DeviceEvent, EventBus};
use crate::sensors::sensor::SensorHandle;
use crate::sensors::types::SensorType;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A registered sensor together with the device that owns it.
#[derive(Debug, Clone)]
pub struct RegisteredSensor {
    pub owner: DeviceKey,
    pub handle: SensorHandle,
}

#[derive(Debug)]
pub struct SensorRegistry {
    sensors: RwLock<BTreeMap<SensorType, Vec<RegisteredSensor>>>,
    events: EventBus,
}

impl SensorRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            sensors: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Register all sensors of one device. Already registered sensors are skipped.
    pub fn register(&self, owner: DeviceKey, handles: &[SensorHandle]) {
        let mut changed = false;
        {
            let mut sensors = self.sensors.write().unwrap_or_else(|e| e.into_inner());
            for handle in handles {
                let entries = sensors.entry(handle.sensor_type()).or_default();
                if entries.iter().any(|e| e.owner == owner) {
                    continue;
                }
                entries.push(RegisteredSensor {
                    owner,
                    handle: handle.clone(),
                });
                changed = true;
            }
        }

        if changed {
            tracing::debug!("Registered sensors of {:?}", owner);
            self.events.publish(DeviceEvent::SensorsChanged);
        }
    }

    /// Remove every sensor owned by `owner`.
    pub fn unregister(&self, owner: DeviceKey) {
        let mut changed = false;
        {
            let mut sensors = self.sensors.write().unwrap_or_else(|e| e.into_inner());
            for entries in sensors.values_mut() {
                let before = entries.len();
                entries.retain(|e| e.owner != owner);
                changed |= entries.len() != before;
            }
            sensors.retain(|_, entries| !entries.is_empty());
        }

        if changed {
            tracing::debug!("Unregistered sensors of {:?}", owner);
            self.events.publish(DeviceEvent::SensorsChanged);
        }
    }

    /// All registered sensors of one type.
    pub fn sensors(&self, sensor_type: SensorType) -> Vec<RegisteredSensor> {
        self.sensors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&sensor_type)
            .cloned()
            .unwrap_or_default()
    }

    /// First registered sensor of a type that currently has data.
    pub fn first_active(&self, sensor_type: SensorType) -> Option<SensorHandle> {
        self.sensors(sensor_type)
            .into_iter()
            .map(|r| r.handle)
            .find(|h| h.is_active())
    }

    /// Sensor types with at least one registered provider.
    pub fn sensor_types(&self) -> Vec<SensorType> {
        self.sensors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    pub fn is_registered(&self, owner: DeviceKey) -> bool {
        self.sensors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|entries| entries.iter().any(|e| e.owner == owner))
    }
}
