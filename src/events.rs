//! Typed event bus between the device layer and its consumers.
//!
//! Device lifecycle events flow out through [`EventBus`]; settings changes flow
//! in as [`SettingsEvent`]s handled by the device manager.

use crate::devices::{DeviceId, DeviceType, Protocol};
use crate::manager::InvariantViolation;
use tokio::sync::broadcast;

/// Events published by the device layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A search for one remote device started
    SearchStarted {
        device_id: DeviceId,
        device_type: DeviceType,
        protocol: Protocol,
    },
    /// A search for one remote device ended
    SearchStopped { device_id: DeviceId, found: bool },
    /// The search queue ran empty
    SearchFinishedForAll,
    /// A remote device was created and is tracked by the manager
    NewDevice {
        device_id: DeviceId,
        device_type: DeviceType,
    },
    /// A remote device was shut down and forgotten
    DeviceRemoved { device_id: DeviceId },
    /// First measurement received from a remote device
    ReceivingData { device_id: DeviceId },
    /// A connected remote device stopped delivering data
    ConnectionLost { device_id: DeviceId },
    /// The set of registered sensors changed
    SensorsChanged,
    /// Pairing state of a device changed
    PairingChanged { device_id: DeviceId, paired: bool },
    /// Calibration factor of a device changed
    CalibrationFactorChanged { device_id: DeviceId, factor: f64 },
    /// Manufacturer reported by a device
    ManufacturerChanged {
        device_id: DeviceId,
        manufacturer: String,
    },
    /// Battery level reported by a device
    BatteryChanged { device_id: DeviceId, percentage: u8 },
    /// A new lap started
    NewLap,
    /// The device layer detected a state machine desync
    InvariantViolated(InvariantViolation),
}

/// Events consumed from the settings layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsEvent {
    PairingChanged { device_id: DeviceId, paired: bool },
    CalibrationFactorChanged { device_id: DeviceId },
}

/// Broadcast bus for [`DeviceEvent`]s.
///
/// Publishing never blocks; slow subscribers observe `Lagged` from their receiver.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: DeviceEvent) {
        tracing::trace!("Publishing {:?}", event);
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
