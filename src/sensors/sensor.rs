//! Typed, observable sensor value cells.

use crate::sensors::deferred;
use crate::sensors::types::{SensorType, SensorValueType};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// A value that can be carried by a [`Sensor`].
pub trait SensorValue: Clone + Send + Sync + fmt::Debug + 'static {
    /// Representation tag matching [`SensorType::value_type`].
    const VALUE_TYPE: SensorValueType;

    /// Wrap a sensor of this value type into a [`SensorHandle`].
    fn into_handle(sensor: Arc<Sensor<Self>>) -> SensorHandle;
}

impl SensorValue for i32 {
    const VALUE_TYPE: SensorValueType = SensorValueType::Integer;

    fn into_handle(sensor: Arc<Sensor<Self>>) -> SensorHandle {
        SensorHandle::Integer(sensor)
    }
}

impl SensorValue for f64 {
    const VALUE_TYPE: SensorValueType = SensorValueType::Double;

    fn into_handle(sensor: Arc<Sensor<Self>>) -> SensorHandle {
        SensorHandle::Double(sensor)
    }
}

impl SensorValue for String {
    const VALUE_TYPE: SensorValueType = SensorValueType::Text;

    fn into_handle(sensor: Arc<Sensor<Self>>) -> SensorHandle {
        SensorHandle::Text(sensor)
    }
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(SensorType, Option<&T>) + Send + Sync>;

#[derive(Debug)]
struct SensorState<T> {
    value: Option<T>,
    active: bool,
}

/// Latest sample of one measurement plus an activation flag.
///
/// Listeners are called synchronously, in call order, after the value lock has
/// been released. Inside a [`DeferredNotifications`](crate::sensors::DeferredNotifications)
/// scope they run when the scope ends. A listener receives `None` when the
/// sensor is deactivated or its value becomes undefined.
pub struct Sensor<T: SensorValue> {
    sensor_type: SensorType,
    state: RwLock<SensorState<T>>,
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
    next_listener: AtomicU64,
}

impl<T: SensorValue> Sensor<T> {
    /// Create an inactive sensor without a value.
    pub fn new(sensor_type: SensorType) -> Self {
        debug_assert_eq!(
            sensor_type.value_type(),
            T::VALUE_TYPE,
            "sensor type {sensor_type:?} does not carry {:?} values",
            T::VALUE_TYPE
        );

        Self {
            sensor_type,
            state: RwLock::new(SensorState {
                value: None,
                active: false,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    /// Replace the current value, mark the sensor active and notify listeners.
    pub fn new_value(&self, value: T) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.value = Some(value.clone());
            state.active = true;
        }
        self.notify(Some(&value));
    }

    /// Mark the current value as undefined without deactivating the sensor.
    pub fn clear_value(&self) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.value = None;
        }
        self.notify(None);
    }

    /// Latest value, or `None` when inactive or undefined.
    pub fn value(&self) -> Option<T> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.active {
            state.value.clone()
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).active
    }

    pub fn activate(&self) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).active = true;
    }

    /// Deactivate and drop the stale value so nobody reads it past relevance.
    pub fn deactivate(&self) {
        let was_active = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let was_active = state.active;
            state.active = false;
            state.value = None;
            was_active
        };
        if was_active {
            self.notify(None);
        }
    }

    /// Register a listener that is called on every change.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(SensorType, Option<&T>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self, value: Option<&T>) {
        // Snapshot so a listener may add or remove listeners.
        let listeners: Vec<Listener<T>> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }

        let sensor_type = self.sensor_type;
        let value = value.cloned();
        deferred::dispatch(move || {
            for listener in listeners {
                listener(sensor_type, value.as_ref());
            }
        });
    }
}

impl<T: SensorValue> fmt::Debug for Sensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Sensor")
            .field("sensor_type", &self.sensor_type)
            .field("value", &state.value)
            .field("active", &state.active)
            .finish()
    }
}

/// Type-preserving reference to a sensor of any value type.
#[derive(Debug, Clone)]
pub enum SensorHandle {
    Integer(Arc<Sensor<i32>>),
    Double(Arc<Sensor<f64>>),
    Text(Arc<Sensor<String>>),
}

impl SensorHandle {
    pub fn sensor_type(&self) -> SensorType {
        match self {
            SensorHandle::Integer(s) => s.sensor_type(),
            SensorHandle::Double(s) => s.sensor_type(),
            SensorHandle::Text(s) => s.sensor_type(),
        }
    }

    pub fn value_type(&self) -> SensorValueType {
        match self {
            SensorHandle::Integer(_) => SensorValueType::Integer,
            SensorHandle::Double(_) => SensorValueType::Double,
            SensorHandle::Text(_) => SensorValueType::Text,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            SensorHandle::Integer(s) => s.is_active(),
            SensorHandle::Double(s) => s.is_active(),
            SensorHandle::Text(s) => s.is_active(),
        }
    }

    pub fn activate(&self) {
        match self {
            SensorHandle::Integer(s) => s.activate(),
            SensorHandle::Double(s) => s.activate(),
            SensorHandle::Text(s) => s.activate(),
        }
    }

    pub fn deactivate(&self) {
        match self {
            SensorHandle::Integer(s) => s.deactivate(),
            SensorHandle::Double(s) => s.deactivate(),
            SensorHandle::Text(s) => s.deactivate(),
        }
    }

    pub fn as_integer(&self) -> Option<&Arc<Sensor<i32>>> {
        match self {
            SensorHandle::Integer(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<&Arc<Sensor<f64>>> {
        match self {
            SensorHandle::Double(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&Arc<Sensor<String>>> {
        match self {
            SensorHandle::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Latest value formatted with its unit, `None` when there is no data.
    pub fn display_value(&self) -> Option<String> {
        let unit = self.sensor_type().unit();
        let text = match self {
            SensorHandle::Integer(s) => s.value().map(|v| v.to_string()),
            SensorHandle::Double(s) => s.value().map(|v| format!("{v:.2}")),
            SensorHandle::Text(s) => s.value(),
        }?;
        if unit.is_empty() {
            Some(text)
        } else {
            Some(format!("{text} {unit}"))
        }
    }

    /// Whether both handles point at the same sensor cell.
    pub fn ptr_eq(&self, other: &SensorHandle) -> bool {
        match (self, other) {
            (SensorHandle::Integer(a), SensorHandle::Integer(b)) => Arc::ptr_eq(a, b),
            (SensorHandle::Double(a), SensorHandle::Double(b)) => Arc::ptr_eq(a, b),
            (SensorHandle::Text(a), SensorHandle::Text(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
