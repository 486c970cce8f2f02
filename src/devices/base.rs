//! Sensor ownership and lifecycle shared by every device.

use crate::devices::{DeviceKey, DeviceType};
use crate::sensors::{
    Accumulate, AccumulatorSensor, LapReset, Sensor, SensorHandle, SensorRegistry, SensorType,
    SensorValue,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lifecycle of a device.
///
/// `Constructed → SensorsAdded → (Registered ⇄ Unregistered) → ShutDown`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Constructed,
    SensorsAdded,
    Registered,
    Unregistered,
    ShutDown,
}

type Release = Box<dyn FnOnce() + Send>;

/// Sensor map and lifecycle of one device.
///
/// Sensor types are unique per device. Sensors are visible through the
/// [`SensorRegistry`] only while the core is `Registered`.
pub struct DeviceCore {
    key: DeviceKey,
    device_type: DeviceType,
    state: LifecycleState,
    sensors: BTreeMap<SensorType, SensorHandle>,
    lap_accumulators: Vec<Arc<dyn LapReset>>,
    releases: Vec<Release>,
    registry: Arc<SensorRegistry>,
}

impl DeviceCore {
    pub fn new(key: DeviceKey, device_type: DeviceType, registry: Arc<SensorRegistry>) -> Self {
        Self {
            key,
            device_type,
            state: LifecycleState::Constructed,
            sensors: BTreeMap::new(),
            lap_accumulators: Vec::new(),
            releases: Vec::new(),
            registry,
        }
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state == LifecycleState::Registered
    }

    pub fn is_shut_down(&self) -> bool {
        self.state == LifecycleState::ShutDown
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    /// Create and own a sensor of the given type.
    pub fn add_sensor<T: SensorValue>(&mut self, sensor_type: SensorType) -> Arc<Sensor<T>> {
        let sensor = Arc::new(Sensor::<T>::new(sensor_type));
        self.insert(T::into_handle(sensor.clone()));
        sensor
    }

    /// Create and own an accumulator sensor.
    pub fn add_accumulator<T: Accumulate>(
        &mut self,
        sensor_type: SensorType,
        initial: T,
        lap_scoped: bool,
    ) -> Arc<AccumulatorSensor<T>> {
        let accumulator = Arc::new(AccumulatorSensor::new(sensor_type, initial, lap_scoped));
        self.insert(T::into_handle(accumulator.sensor().clone()));
        if lap_scoped {
            self.lap_accumulators.push(accumulator.clone());
        }
        accumulator
    }

    fn insert(&mut self, handle: SensorHandle) {
        if let Some(previous) = self.sensors.insert(handle.sensor_type(), handle) {
            tracing::warn!(
                "{:?} replaced its {} sensor",
                self.key,
                previous.sensor_type()
            );
        }
    }

    /// Mark sensor creation as complete.
    pub fn sensors_added(&mut self) {
        if self.state == LifecycleState::Constructed {
            self.state = LifecycleState::SensorsAdded;
        }
    }

    /// Make the sensors visible. Repeat calls only re-activate.
    pub fn register_sensors(&mut self) {
        match self.state {
            LifecycleState::ShutDown => {
                tracing::warn!("register_sensors on shut down device {:?}", self.key);
            }
            LifecycleState::Registered => {
                for handle in self.sensors.values() {
                    handle.activate();
                }
            }
            _ => {
                let handles: Vec<SensorHandle> = self.sensors.values().cloned().collect();
                for handle in &handles {
                    handle.activate();
                }
                self.registry.register(self.key, &handles);
                self.state = LifecycleState::Registered;
                tracing::debug!("{} sensors registered ({:?})", self.device_type, self.key);
            }
        }
    }

    /// Deactivate every sensor and hide them from consumers.
    pub fn unregister_sensors(&mut self) {
        if self.state != LifecycleState::Registered {
            return;
        }

        for handle in self.sensors.values() {
            handle.deactivate();
        }
        self.registry.unregister(self.key);
        self.state = LifecycleState::Unregistered;
        tracing::debug!("{} sensors unregistered ({:?})", self.device_type, self.key);
    }

    /// Register a hook releasing an external subscription on shutdown.
    pub fn on_release<F>(&mut self, release: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.state == LifecycleState::ShutDown {
            release();
        } else {
            self.releases.push(Box::new(release));
        }
    }

    /// Terminal shutdown. A second call is a no-op.
    pub fn shut_down(&mut self) {
        if self.state == LifecycleState::ShutDown {
            tracing::debug!("{:?} already shut down", self.key);
            return;
        }

        self.unregister_sensors();
        for release in self.releases.drain(..) {
            release();
        }
        self.state = LifecycleState::ShutDown;
        tracing::info!("{} shut down ({:?})", self.device_type, self.key);
    }

    /// Reset lap-scoped accumulators.
    pub fn new_lap(&self) {
        for accumulator in &self.lap_accumulators {
            accumulator.reset();
        }
    }

    pub fn sensor(&self, sensor_type: SensorType) -> Option<&SensorHandle> {
        self.sensors.get(&sensor_type)
    }

    pub fn sensor_types(&self) -> Vec<SensorType> {
        self.sensors.keys().copied().collect()
    }

    pub fn handles(&self) -> Vec<SensorHandle> {
        self.sensors.values().cloned().collect()
    }
}

impl Drop for DeviceCore {
    fn drop(&mut self) {
        if self.state != LifecycleState::ShutDown {
            self.shut_down();
        }
    }
}

impl std::fmt::Debug for DeviceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCore")
            .field("key", &self.key)
            .field("device_type", &self.device_type)
            .field("state", &self.state)
            .field("sensors", &self.sensor_types())
            .finish()
    }
}
