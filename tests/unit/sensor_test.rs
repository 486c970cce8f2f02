//! Unit tests for sensor cells, accumulators, the registry and device cores.

use std::sync::{Arc, Mutex};
use trainingtracker::devices::{DeviceCore, DeviceKey, LifecycleState};
use trainingtracker::sensors::{AccumulatorSensor, SensorHandle};
use trainingtracker::{DeviceEvent, DeviceType, EventBus, Sensor, SensorRegistry, SensorType};

#[test]
fn test_listeners_see_values_in_order() {
    let sensor = Sensor::<i32>::new(SensorType::Cadence);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let id = sensor.add_listener(move |sensor_type, value| {
        assert_eq!(sensor_type, SensorType::Cadence);
        sink.lock().unwrap().push(value.copied());
    });

    sensor.new_value(80);
    sensor.new_value(82);
    sensor.clear_value();
    sensor.deactivate();

    assert!(sensor.remove_listener(id));
    sensor.new_value(90);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some(80), Some(82), None, None]
    );
    assert!(!sensor.remove_listener(id));
}

#[test]
fn test_inactive_sensor_has_no_value() {
    let sensor = Sensor::<f64>::new(SensorType::SpeedMps);
    sensor.new_value(4.2);
    assert_eq!(sensor.value(), Some(4.2));

    sensor.deactivate();
    assert!(!sensor.is_active());
    assert_eq!(sensor.value(), None);

    // Activation alone does not bring the old value back
    sensor.activate();
    assert_eq!(sensor.value(), None);
}

#[test]
fn test_clear_value_keeps_sensor_active() {
    let sensor = Sensor::<i32>::new(SensorType::HeartRate);
    sensor.new_value(100);
    sensor.clear_value();

    assert!(sensor.is_active());
    assert_eq!(sensor.value(), None);
}

#[test]
fn test_display_value_with_unit() {
    let speed = SensorHandle::Double(Arc::new(Sensor::new(SensorType::SpeedMps)));
    assert_eq!(speed.display_value(), None);
    speed.as_double().unwrap().new_value(3.14159);
    assert_eq!(speed.display_value().as_deref(), Some("3.14 m/s"));

    let clock = SensorHandle::Text(Arc::new(Sensor::new(SensorType::TimeOfDay)));
    clock.as_text().unwrap().new_value("12:00:00".to_string());
    assert_eq!(clock.display_value().as_deref(), Some("12:00:00"));
    assert!(clock.as_integer().is_none());
}

#[test]
fn test_accumulator_total_survives_deactivation() {
    let distance = AccumulatorSensor::<f64>::new(SensorType::DistanceM, 0.0, false);
    distance.increment(100.0);
    distance.sensor().deactivate();

    assert_eq!(distance.value(), None);
    assert_eq!(distance.total(), 100.0);

    distance.increment(5.0);
    assert_eq!(distance.value(), Some(105.0));
}

#[test]
fn test_accumulator_reset_to() {
    let laps = AccumulatorSensor::<i32>::new(SensorType::Power, 0, true);
    laps.increment(3);
    laps.reset_to(10);
    assert_eq!(laps.value(), Some(10));
    assert!(laps.is_lap_scoped());
}

#[test]
fn test_registry_lists_by_type_and_owner() {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let registry = SensorRegistry::new(events);

    let hr1 = SensorHandle::Integer(Arc::new(Sensor::new(SensorType::HeartRate)));
    let hr2 = SensorHandle::Integer(Arc::new(Sensor::new(SensorType::HeartRate)));
    registry.register(DeviceKey::Remote(1), &[hr1.clone()]);
    registry.register(DeviceKey::Remote(2), &[hr2.clone()]);
    // Registering twice is a no-op
    registry.register(DeviceKey::Remote(1), &[hr1.clone()]);

    let sensors = registry.sensors(SensorType::HeartRate);
    assert_eq!(sensors.len(), 2);
    assert!(sensors[0].handle.ptr_eq(&hr1));
    assert_eq!(sensors[1].owner, DeviceKey::Remote(2));

    hr2.as_integer().unwrap().new_value(150);
    let first = registry.first_active(SensorType::HeartRate).unwrap();
    assert!(first.ptr_eq(&hr2));

    registry.unregister(DeviceKey::Remote(2));
    assert!(!registry.is_registered(DeviceKey::Remote(2)));
    assert!(registry.first_active(SensorType::HeartRate).is_none());

    registry.unregister(DeviceKey::Remote(1));
    assert!(registry.sensor_types().is_empty());

    let changes = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| *e == DeviceEvent::SensorsChanged)
        .count();
    assert_eq!(changes, 4);
}

#[test]
fn test_device_core_lifecycle() {
    let registry = Arc::new(SensorRegistry::new(EventBus::default()));
    let mut core = DeviceCore::new(
        DeviceKey::Remote(5),
        DeviceType::BikeSpeed,
        registry.clone(),
    );
    let speed = core.add_sensor::<f64>(SensorType::SpeedMps);
    let lap = core.add_accumulator::<f64>(SensorType::LapDistanceM, 0.0, true);
    core.sensors_added();
    assert_eq!(core.state(), LifecycleState::SensorsAdded);
    assert!(registry.sensor_types().is_empty());

    core.register_sensors();
    assert!(core.is_registered());
    assert_eq!(
        registry.sensor_types(),
        vec![SensorType::SpeedMps, SensorType::LapDistanceM]
    );

    lap.increment(12.0);
    core.new_lap();
    assert_eq!(lap.value(), Some(0.0));

    speed.new_value(8.0);
    core.unregister_sensors();
    assert_eq!(speed.value(), None);
    assert!(registry.sensor_types().is_empty());

    let released = Arc::new(Mutex::new(0));
    let counter = released.clone();
    core.on_release(move || *counter.lock().unwrap() += 1);

    core.shut_down();
    core.shut_down();
    assert!(core.is_shut_down());
    assert_eq!(*released.lock().unwrap(), 1);

    // Shut down devices stay invisible
    core.register_sensors();
    assert!(registry.sensor_types().is_empty());
}
