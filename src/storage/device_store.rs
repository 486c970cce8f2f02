//! Persistence collaborator for remote devices.

use crate::devices::{DeviceId, DeviceType, Protocol};
use crate::storage::StoreError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A persisted remote device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub protocol: Protocol,
    pub paired: bool,
    /// Distance per wheel revolution for bike devices, speed multiplier for
    /// run devices
    pub calibration_factor: f64,
    pub ant_device_number: Option<u16>,
    pub bluetooth_mac_address: Option<String>,
    pub manufacturer: Option<String>,
    pub battery_percentage: Option<u8>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// A paired ANT+ device.
    pub fn ant(id: DeviceId, name: &str, device_type: DeviceType, device_number: u16) -> Self {
        Self {
            ant_device_number: Some(device_number),
            ..Self::new(id, name, device_type, Protocol::AntPlus)
        }
    }

    /// A paired Bluetooth LE device.
    pub fn bluetooth(id: DeviceId, name: &str, device_type: DeviceType, mac_address: &str) -> Self {
        Self {
            bluetooth_mac_address: Some(mac_address.to_string()),
            ..Self::new(id, name, device_type, Protocol::BluetoothLe)
        }
    }

    fn new(id: DeviceId, name: &str, device_type: DeviceType, protocol: Protocol) -> Self {
        Self {
            id,
            name: name.to_string(),
            device_type,
            protocol,
            paired: true,
            calibration_factor: default_calibration_factor(device_type),
            ant_device_number: None,
            bluetooth_mac_address: None,
            manufacturer: None,
            battery_percentage: None,
            last_seen_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_calibration_factor(mut self, calibration_factor: f64) -> Self {
        self.calibration_factor = calibration_factor;
        self
    }

    pub fn unpaired(mut self) -> Self {
        self.paired = false;
        self
    }
}

/// Calibration factor a new device starts with: a 700x23c wheel for bikes,
/// no correction for everything else.
pub fn default_calibration_factor(device_type: DeviceType) -> f64 {
    match device_type {
        DeviceType::BikeSpeed | DeviceType::BikeSpeedAndCadence | DeviceType::BikePower => 2.096,
        _ => 1.0,
    }
}

/// Device persistence keyed by the stable device ID.
///
/// Only [`device`](Self::device), [`devices`](Self::devices),
/// [`insert_device`](Self::insert_device) and [`update`](Self::update) are
/// required; the accessors are derived from them.
pub trait DeviceStore: Send + Sync {
    fn device(&self, id: DeviceId) -> Result<Option<DeviceRecord>, StoreError>;

    fn devices(&self) -> Result<Vec<DeviceRecord>, StoreError>;

    fn insert_device(&self, record: &DeviceRecord) -> Result<(), StoreError>;

    /// Apply a change to a stored record.
    fn update(
        &self,
        id: DeviceId,
        change: &mut dyn FnMut(&mut DeviceRecord),
    ) -> Result<(), StoreError>;

    fn require(&self, id: DeviceId) -> Result<DeviceRecord, StoreError> {
        self.device(id)?.ok_or(StoreError::NotFound(id))
    }

    fn device_type(&self, id: DeviceId) -> Result<DeviceType, StoreError> {
        Ok(self.require(id)?.device_type)
    }

    fn protocol(&self, id: DeviceId) -> Result<Protocol, StoreError> {
        Ok(self.require(id)?.protocol)
    }

    fn is_paired(&self, id: DeviceId) -> Result<bool, StoreError> {
        Ok(self.require(id)?.paired)
    }

    fn calibration_factor(&self, id: DeviceId) -> Result<f64, StoreError> {
        Ok(self.require(id)?.calibration_factor)
    }

    fn ant_device_number(&self, id: DeviceId) -> Result<Option<u16>, StoreError> {
        Ok(self.require(id)?.ant_device_number)
    }

    fn bluetooth_mac_address(&self, id: DeviceId) -> Result<Option<String>, StoreError> {
        Ok(self.require(id)?.bluetooth_mac_address)
    }

    fn paired_device_ids(&self) -> Result<Vec<DeviceId>, StoreError> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.paired)
            .map(|d| d.id)
            .collect())
    }

    fn set_manufacturer(&self, id: DeviceId, manufacturer: &str) -> Result<(), StoreError> {
        self.update(id, &mut |d: &mut DeviceRecord| d.manufacturer = Some(manufacturer.to_string()))
    }

    fn set_battery_percentage(&self, id: DeviceId, percentage: u8) -> Result<(), StoreError> {
        self.update(id, &mut |d: &mut DeviceRecord| d.battery_percentage = Some(percentage))
    }

    fn set_calibration_factor(&self, id: DeviceId, factor: f64) -> Result<(), StoreError> {
        self.update(id, &mut |d: &mut DeviceRecord| d.calibration_factor = factor)
    }

    fn set_paired(&self, id: DeviceId, paired: bool) -> Result<(), StoreError> {
        self.update(id, &mut |d: &mut DeviceRecord| d.paired = paired)
    }

    fn touch_last_seen(&self, id: DeviceId) -> Result<(), StoreError> {
        let now = Utc::now();
        self.update(id, &mut |d: &mut DeviceRecord| d.last_seen_at = Some(now))
    }
}

/// Store kept in memory, used by tests and the demo binary.
#[derive(Debug, Default)]
pub struct InMemoryDeviceStore {
    devices: RwLock<BTreeMap<DeviceId, DeviceRecord>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let devices = records.into_iter().map(|r| (r.id, r)).collect();
        Self {
            devices: RwLock::new(devices),
        }
    }
}

impl DeviceStore for InMemoryDeviceStore {
    fn device(&self, id: DeviceId) -> Result<Option<DeviceRecord>, StoreError> {
        let devices = self.devices.read().map_err(|_| StoreError::Poisoned)?;
        Ok(devices.get(&id).cloned())
    }

    fn devices(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        let devices = self.devices.read().map_err(|_| StoreError::Poisoned)?;
        Ok(devices.values().cloned().collect())
    }

    fn insert_device(&self, record: &DeviceRecord) -> Result<(), StoreError> {
        let mut devices = self.devices.write().map_err(|_| StoreError::Poisoned)?;
        if devices.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        devices.insert(record.id, record.clone());
        Ok(())
    }

    fn update(
        &self,
        id: DeviceId,
        change: &mut dyn FnMut(&mut DeviceRecord),
    ) -> Result<(), StoreError> {
        let mut devices = self.devices.write().map_err(|_| StoreError::Poisoned)?;
        let record = devices.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        change(record);
        Ok(())
    }
}
