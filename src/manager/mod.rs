//! Device manager: owner of every device and driver of the search queue.
//!
//! All mutable state lives behind one mutex. Sensor listeners never run while
//! it is held: every locked section is also a [`DeferredNotifications`] scope,
//! so listeners may call back into the manager. Protocol callbacks arrive
//! through [`SearchReporter`]s holding a weak reference to the manager, so a
//! dropped manager silently ends in-flight searches.

pub mod search_queue;

use crate::devices::local::{Capabilities, LocalDevices, LocationFix, LocationProvider};
use crate::devices::{
    Device, DeviceId, DeviceMetadata, DeviceType, Frame, Protocol, RemoteDevice,
    RemoteDeviceInfo, SearchState, SportType,
};
use crate::events::{DeviceEvent, EventBus, SettingsEvent};
use crate::sensors::{
    DeferredNotifications, RegisteredSensor, SensorError, SensorRegistry, SensorType,
};
use crate::storage::config::AppConfig;
use crate::storage::device_store::{DeviceRecord, DeviceStore};
use crate::transport::{DeviceAddress, SearchDriver, SearchReporter, SearchRequest};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use search_queue::{RetryDecision, SearchQueue};

/// State machine desync detected by the device layer.
///
/// These never abort; they are logged and published so they can be counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("device {0} is already searching")]
    AlreadySearching(DeviceId),

    #[error("search stopped for device {reported}, but the current search is {current:?}")]
    UnexpectedSearchStopped {
        reported: DeviceId,
        current: Option<DeviceId>,
    },

    #[error("device {0} paired again while already tracked")]
    AlreadyPaired(DeviceId),
}

/// Snapshot of one tracked remote device.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDeviceStatus {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub protocol: Protocol,
    pub search_state: SearchState,
    pub calibration_factor: f64,
    pub metadata: DeviceMetadata,
}

impl From<&RemoteDevice> for RemoteDeviceStatus {
    fn from(device: &RemoteDevice) -> Self {
        Self {
            id: device.id(),
            name: device.name(),
            device_type: device.device_type(),
            protocol: device.protocol(),
            search_state: device.search_state(),
            calibration_factor: device.calibration_factor(),
            metadata: device.metadata().clone(),
        }
    }
}

impl From<&DeviceRecord> for RemoteDeviceInfo {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            device_type: record.device_type,
            protocol: record.protocol,
            calibration_factor: record.calibration_factor,
        }
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    devices: BTreeMap<DeviceId, RemoteDevice>,
    queue: SearchQueue,
    local: LocalDevices,
    selected_sport: SportType,
    shut_down: bool,
}

/// Locked manager state. The mutex is released before the sensor listener
/// calls collected meanwhile are run.
struct StateGuard<'a> {
    // Field order matters: the mutex guard drops first.
    state: MutexGuard<'a, ManagerState>,
    _notifications: DeferredNotifications,
}

impl Deref for StateGuard<'_> {
    type Target = ManagerState;

    fn deref(&self) -> &ManagerState {
        &self.state
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut ManagerState {
        &mut self.state
    }
}

pub struct DeviceManager {
    state: Mutex<ManagerState>,
    config: AppConfig,
    store: Arc<dyn DeviceStore>,
    driver: Arc<dyn SearchDriver>,
    registry: Arc<SensorRegistry>,
    events: EventBus,
    self_ref: Weak<DeviceManager>,
}

impl DeviceManager {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DeviceStore>,
        driver: Arc<dyn SearchDriver>,
        events: EventBus,
    ) -> Arc<Self> {
        let registry = Arc::new(SensorRegistry::new(events.clone()));

        Arc::new_cyclic(|self_ref| Self {
            state: Mutex::new(ManagerState::default()),
            config,
            store,
            driver,
            registry,
            events,
            self_ref: self_ref.clone(),
        })
    }

    fn lock(&self) -> StateGuard<'_> {
        let notifications = DeferredNotifications::begin();
        StateGuard {
            state: self.state.lock().unwrap_or_else(|e| e.into_inner()),
            _notifications: notifications,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn report_violation(&self, violation: InvariantViolation) {
        tracing::error!("Invariant violated: {}", violation);
        self.events.publish(DeviceEvent::InvariantViolated(violation));
    }


    /// Create the clock, location, barometer and derived devices the
    /// platform supports. Replaces any previously created local devices.
    pub fn create_local_devices(&self, capabilities: Capabilities, runtime: Option<&Handle>) {
        let local = LocalDevices::create(
            capabilities,
            &self.config.location,
            &self.config.altitude,
            &self.registry,
            runtime,
        );

        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        state.local.shut_down();
        state.local = local;
    }

    pub fn local_device_types(&self) -> Vec<DeviceType> {
        self.lock().local.device_types()
    }

    pub fn active_local_device_types(&self) -> Vec<DeviceType> {
        self.lock().local.active_device_types()
    }

    pub fn deliver_location(&self, provider: LocationProvider, fix: LocationFix) {
        match self.lock().local.location_mut(provider) {
            Some(device) => device.on_location(fix),
            None => tracing::debug!("No {} location device, fix dropped", provider),
        }
    }

    pub fn set_location_provider_enabled(&self, provider: LocationProvider, enabled: bool) {
        if let Some(device) = self.lock().local.location_mut(provider) {
            device.set_provider_enabled(enabled);
        }
    }

    pub fn deliver_pressure(&self, pressure_hpa: f64) {
        match self.lock().local.altitude_mut() {
            Some(device) => device.on_pressure(pressure_hpa),
            None => tracing::debug!("No barometer device, pressure dropped"),
        }
    }


    fn create_remote_device(&self, device_id: DeviceId) -> Result<RemoteDevice, SensorError> {
        let record = self.store.require(device_id)?;
        let mut device = RemoteDevice::new(
            RemoteDeviceInfo::from(&record),
            self.registry.clone(),
            self.events.clone(),
            &self.config.decoding,
        )?;
        device.update_metadata(DeviceMetadata {
            manufacturer: record.manufacturer.clone(),
            battery_percentage: record.battery_percentage,
        });

        self.events.publish(DeviceEvent::NewDevice {
            device_id,
            device_type: record.device_type,
        });
        Ok(device)
    }

    fn address(&self, device_id: DeviceId, protocol: Protocol) -> Result<DeviceAddress, SensorError> {
        match protocol {
            Protocol::BluetoothLe => self
                .store
                .bluetooth_mac_address(device_id)?
                .map(DeviceAddress::Bluetooth)
                .ok_or(SensorError::MissingAddress(device_id)),
            Protocol::AntPlus => self
                .store
                .ant_device_number(device_id)?
                .map(|device_number| DeviceAddress::Ant { device_number })
                .ok_or(SensorError::MissingAddress(device_id)),
        }
    }

    /// Queue every paired device that is not receiving data and start
    /// searching if nothing is searched yet.
    pub fn search_for_paired_devices(&self) -> Result<(), SensorError> {
        let paired = self.store.paired_device_ids()?;
        let tries = self.config.search.search_tries;

        let mut state = self.lock();
        if state.shut_down {
            return Ok(());
        }

        for device_id in paired {
            match state.devices.get(&device_id) {
                Some(device) if device.is_receiving_data() => continue,
                Some(_) => {}
                None => match self.create_remote_device(device_id) {
                    Ok(device) => {
                        state.devices.insert(device_id, device);
                    }
                    Err(e) => {
                        tracing::warn!("Cannot create device {}: {}", device_id, e);
                        continue;
                    }
                },
            }
            state.queue.enqueue(device_id, tries);
        }

        tracing::info!("Paired devices queued: {:?}", state.queue.pending());
        if state.queue.current().is_none() {
            self.search_next(&mut state);
        }
        Ok(())
    }

    /// Advance the search queue by one device.
    pub fn search_for_next_remote_device(&self) {
        let mut state = self.lock();
        self.search_next(&mut state);
    }

    fn search_next(&self, state: &mut ManagerState) {
        if state.shut_down {
            return;
        }

        loop {
            let Some(device_id) = state.queue.pop_next() else {
                tracing::info!("Search finished for all devices");
                self.events.publish(DeviceEvent::SearchFinishedForAll);
                return;
            };

            let Some(device) = state.devices.get_mut(&device_id) else {
                tracing::debug!("Device {} no longer tracked, skipping", device_id);
                state.queue.forget(device_id);
                continue;
            };

            if device.is_searching() {
                self.report_violation(InvariantViolation::AlreadySearching(device_id));
                return;
            }

            if device.is_receiving_data() {
                tracing::debug!("Device {} already receiving data, skipping", device_id);
                state.queue.forget(device_id);
                continue;
            }

            if self.config.search.restrict_to_sport {
                if let Some(sport) = device.device_type().sport_type() {
                    if sport != state.selected_sport {
                        tracing::info!(
                            "Skipping {} ({:?} device, selected sport {:?})",
                            device_id,
                            sport,
                            state.selected_sport
                        );
                        state.queue.forget(device_id);
                        continue;
                    }
                }
            }

            let address = match self.address(device_id, device.protocol()) {
                Ok(address) => address,
                Err(e) => {
                    tracing::warn!("Cannot search for {}: {}", device_id, e);
                    state.queue.forget(device_id);
                    continue;
                }
            };

            let cancel = device.start_searching();
            let request = SearchRequest {
                device_id,
                device_type: device.device_type(),
                protocol: device.protocol(),
                address,
                timeout: self.config.search.search_timeout(),
                cancel,
            };
            self.driver
                .begin_search(request, SearchReporter::new(self.self_ref.clone()));
            return;
        }
    }

    /// The protocol layer finished a search for `device_id`.
    pub fn on_search_stopped(&self, device_id: DeviceId, found: bool) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }

        if !state.queue.is_current(device_id) {
            let current = state.queue.current();
            self.report_violation(InvariantViolation::UnexpectedSearchStopped {
                reported: device_id,
                current,
            });
            return;
        }

        self.events
            .publish(DeviceEvent::SearchStopped { device_id, found });

        if found {
            tracing::info!("Device {} found", device_id);
            if let Some(device) = state.devices.get_mut(&device_id) {
                device.search_found();
            }
            state.queue.forget(device_id);
        } else {
            if let Some(device) = state.devices.get_mut(&device_id) {
                device.search_failed();
            }

            match state.queue.record_failure(device_id) {
                RetryDecision::Requeued { remaining } => {
                    tracing::warn!(
                        "Device {} not found, {} tries left",
                        device_id,
                        remaining
                    );
                }
                RetryDecision::Exhausted => {
                    tracing::warn!("Device {} not found, giving up", device_id);
                    self.remove_device(&mut state.devices, device_id);
                }
            }
        }

        self.search_next(&mut state);
    }

    fn remove_device(&self, devices: &mut BTreeMap<DeviceId, RemoteDevice>, device_id: DeviceId) {
        if let Some(mut device) = devices.remove(&device_id) {
            device.shut_down();
            self.events.publish(DeviceEvent::DeviceRemoved { device_id });
        }
    }

    /// Raw data from the protocol layer. Returns whether the device is
    /// receiving data afterwards.
    pub fn deliver_frame(&self, device_id: DeviceId, frame: Frame) -> bool {
        let mut state = self.lock();

        let Some(device) = state.devices.get_mut(&device_id) else {
            tracing::debug!("Frame for untracked device {} dropped", device_id);
            return false;
        };

        let outcome = device.handle_frame(&frame);
        let receiving = device.is_receiving_data();

        if let Some(metadata) = outcome.metadata {
            self.persist_metadata(device_id, &metadata);
        }

        if outcome.started_receiving {
            if let Err(e) = self.store.touch_last_seen(device_id) {
                tracing::warn!("Failed to record last seen for {}: {}", device_id, e);
            }
        }

        if outcome.search_succeeded && state.queue.is_current(device_id) {
            tracing::info!("Device {} found", device_id);
            state.queue.forget(device_id);
            self.events.publish(DeviceEvent::SearchStopped {
                device_id,
                found: true,
            });
            self.search_next(&mut state);
        }

        receiving
    }

    /// Device information reported outside of frames.
    pub fn deliver_metadata(&self, device_id: DeviceId, metadata: DeviceMetadata) {
        let mut state = self.lock();
        let changed = state
            .devices
            .get_mut(&device_id)
            .and_then(|device| device.update_metadata(metadata));

        if let Some(changed) = changed {
            self.persist_metadata(device_id, &changed);
        }
    }

    fn persist_metadata(&self, device_id: DeviceId, metadata: &DeviceMetadata) {
        if let Some(manufacturer) = &metadata.manufacturer {
            if let Err(e) = self.store.set_manufacturer(device_id, manufacturer) {
                tracing::warn!("Failed to store manufacturer of {}: {}", device_id, e);
            }
            self.events.publish(DeviceEvent::ManufacturerChanged {
                device_id,
                manufacturer: manufacturer.clone(),
            });
        }

        if let Some(percentage) = metadata.battery_percentage {
            if let Err(e) = self.store.set_battery_percentage(device_id, percentage) {
                tracing::warn!("Failed to store battery level of {}: {}", device_id, e);
            }
            self.events.publish(DeviceEvent::BatteryChanged {
                device_id,
                percentage,
            });
        }
    }

    /// A device that was delivering data went away. It is queued for a
    /// fresh search.
    pub fn on_connection_lost(&self, device_id: DeviceId) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }

        let Some(device) = state.devices.get_mut(&device_id) else {
            tracing::debug!("Connection lost for untracked device {}", device_id);
            return;
        };
        if !device.is_receiving_data() {
            tracing::debug!("Connection lost for {} while not receiving", device_id);
            return;
        }

        device.connection_lost();
        tracing::warn!("Connection to {} lost", device_id);
        self.events
            .publish(DeviceEvent::ConnectionLost { device_id });

        state
            .queue
            .enqueue(device_id, self.config.search.search_tries);
        if state.queue.current().is_none() {
            self.search_next(&mut state);
        }
    }


    pub fn handle_settings_event(&self, event: SettingsEvent) -> Result<(), SensorError> {
        match event {
            SettingsEvent::PairingChanged { device_id, paired } => {
                self.pairing_changed(device_id, paired)
            }
            SettingsEvent::CalibrationFactorChanged { device_id } => {
                let factor = self.store.calibration_factor(device_id)?;
                self.apply_calibration_factor(device_id, factor);
                Ok(())
            }
        }
    }

    fn pairing_changed(&self, device_id: DeviceId, paired: bool) -> Result<(), SensorError> {
        let mut state = self.lock();
        if state.shut_down {
            return Ok(());
        }

        if paired {
            if state.devices.contains_key(&device_id) {
                self.report_violation(InvariantViolation::AlreadyPaired(device_id));
                return Ok(());
            }

            let device = self.create_remote_device(device_id)?;
            state.devices.insert(device_id, device);
            state.queue.enqueue(device_id, 1);
            self.events
                .publish(DeviceEvent::PairingChanged { device_id, paired });

            if state.queue.current().is_none() {
                self.search_next(&mut state);
            }
        } else {
            let was_current = state.queue.forget(device_id);
            if state.devices.contains_key(&device_id) {
                tracing::info!("Device {} unpaired", device_id);
                self.remove_device(&mut state.devices, device_id);
            }
            self.events
                .publish(DeviceEvent::PairingChanged { device_id, paired });

            if was_current {
                self.search_next(&mut state);
            }
        }

        Ok(())
    }

    /// Persist a new calibration factor and apply it to the live device.
    pub fn set_calibration_factor(&self, device_id: DeviceId, factor: f64) -> Result<(), SensorError> {
        self.store.set_calibration_factor(device_id, factor)?;
        self.apply_calibration_factor(device_id, factor);
        Ok(())
    }

    fn apply_calibration_factor(&self, device_id: DeviceId, factor: f64) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.set_calibration_factor(factor);
        }
        tracing::info!("Calibration factor of {} set to {}", device_id, factor);
        self.events
            .publish(DeviceEvent::CalibrationFactorChanged { device_id, factor });
    }

    /// Feed settings events to the manager until the sender is dropped or
    /// the manager goes away.
    pub fn spawn_settings_listener(
        self: &Arc<Self>,
        handle: &Handle,
        mut events: mpsc::Receiver<SettingsEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        handle.spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(e) = manager.handle_settings_event(event) {
                    tracing::warn!("Settings event failed: {}", e);
                }
            }
            tracing::debug!("Settings listener stopped");
        })
    }


    /// Start a new lap on every device.
    pub fn new_lap(&self) {
        let mut state = self.lock();
        for device in state.devices.values_mut() {
            device.new_lap();
        }
        state.local.new_lap();
        self.events.publish(DeviceEvent::NewLap);
    }

    pub fn set_selected_sport(&self, sport: SportType) {
        self.lock().selected_sport = sport;
    }

    pub fn selected_sport(&self) -> SportType {
        self.lock().selected_sport
    }

    /// Sport implied by the devices currently delivering data.
    pub fn sport_type(&self) -> SportType {
        self.lock()
            .devices
            .values()
            .filter(|d| d.is_receiving_data())
            .find_map(|d| d.device_type().sport_type())
            .unwrap_or_default()
    }

    /// Remote devices currently delivering data.
    pub fn active_remote_devices(&self) -> Vec<RemoteDeviceStatus> {
        self.lock()
            .devices
            .values()
            .filter(|d| d.is_receiving_data())
            .map(RemoteDeviceStatus::from)
            .collect()
    }

    /// Every tracked remote device.
    pub fn remote_devices(&self) -> Vec<RemoteDeviceStatus> {
        self.lock()
            .devices
            .values()
            .map(RemoteDeviceStatus::from)
            .collect()
    }

    pub fn remote_device(&self, device_id: DeviceId) -> Option<RemoteDeviceStatus> {
        self.lock()
            .devices
            .get(&device_id)
            .map(RemoteDeviceStatus::from)
    }

    pub fn currently_searching(&self) -> Option<DeviceId> {
        self.lock().queue.current()
    }

    pub fn remaining_tries(&self, device_id: DeviceId) -> Option<u32> {
        self.lock().queue.remaining_tries(device_id)
    }

    pub fn sensors(&self, sensor_type: SensorType) -> Vec<RegisteredSensor> {
        self.registry.sensors(sensor_type)
    }

    pub fn registered_sensor_types(&self) -> Vec<SensorType> {
        self.registry.sensor_types()
    }

    /// Shut down every device and stop all searches. Idempotent.
    pub fn shut_down(&self) {
        let mut state = self.lock();
        if state.shut_down {
            tracing::debug!("Device manager already shut down");
            return;
        }
        state.shut_down = true;

        for (_, mut device) in std::mem::take(&mut state.devices) {
            device.shut_down();
        }
        state.queue.clear();
        state.local.shut_down();
        tracing::info!("Device manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DeviceManager")
            .field("devices", &state.devices.keys().collect::<Vec<_>>())
            .field("current", &state.queue.current())
            .field("pending", &state.queue.pending())
            .finish()
    }
}
