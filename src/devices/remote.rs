//! Remote (ANT+ / Bluetooth LE) devices.
//!
//! A [`RemoteDevice`] combines the shared [`DeviceCore`] with a persisted
//! identity, a calibration factor, the search state machine and a
//! protocol-specific [`FrameDecoder`].

use crate::devices::{ant, ble, Device, DeviceCore, DeviceId, DeviceKey, DeviceType, Protocol};
use crate::events::{DeviceEvent, EventBus};
use crate::sensors::{SensorError, SensorRegistry};
use crate::storage::config::DecodingSettings;
use crate::transport::{CancelSignal, SearchCancel};
use std::sync::Arc;
use uuid::Uuid;

/// Raw data delivered by a protocol stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// BLE characteristic value (notification or read)
    Ble { characteristic: Uuid, data: Vec<u8> },
    /// ANT+ broadcast data page
    Ant { page: [u8; 8] },
}

/// Device information reported next to measurements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub manufacturer: Option<String>,
    pub battery_percentage: Option<u8>,
}

impl DeviceMetadata {
    pub fn is_empty(&self) -> bool {
        self.manufacturer.is_none() && self.battery_percentage.is_none()
    }
}

/// What a decoder made of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// Sensor values were updated
    Measurement,
    /// Only device information was carried
    Metadata(DeviceMetadata),
    /// Sensor values were updated and device information was carried
    MeasurementWithMetadata(DeviceMetadata),
    /// Malformed or irrelevant frame
    Ignored,
}

/// Protocol-specific decoding of raw frames into sensor values.
///
/// Decoders create their sensors on the device core when constructed.
pub trait FrameDecoder: Send {
    fn decode(&mut self, frame: &Frame) -> DecodeOutcome;

    fn set_calibration_factor(&mut self, _calibration_factor: f64) {}

    /// Forget reference samples, e.g. after a reconnect.
    fn reset(&mut self) {}
}

/// Search/connect state of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Searching,
    ReceivingData,
    SearchFailed,
}

/// Effect of one frame on the device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    /// First measurement arrived while searching
    pub search_succeeded: bool,
    /// Device switched to ReceivingData with this frame
    pub started_receiving: bool,
    pub metadata: Option<DeviceMetadata>,
}

/// Persisted description a remote device is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub protocol: Protocol,
    pub calibration_factor: f64,
}

pub struct RemoteDevice {
    id: DeviceId,
    name: String,
    protocol: Protocol,
    calibration_factor: f64,
    search_state: SearchState,
    search_cancel: Option<SearchCancel>,
    metadata: DeviceMetadata,
    decoder: Box<dyn FrameDecoder>,
    events: EventBus,
    core: DeviceCore,
}

impl RemoteDevice {
    /// Create a device and its protocol decoder.
    pub fn new(
        info: RemoteDeviceInfo,
        registry: Arc<SensorRegistry>,
        events: EventBus,
        decoding: &DecodingSettings,
    ) -> Result<Self, SensorError> {
        let mut core = DeviceCore::new(DeviceKey::Remote(info.id), info.device_type, registry);

        let decoder: Box<dyn FrameDecoder> = match info.protocol {
            Protocol::BluetoothLe => {
                ble::decoder_for(info.device_type, &mut core, info.calibration_factor, decoding)?
            }
            Protocol::AntPlus => {
                ant::decoder_for(info.device_type, &mut core, info.calibration_factor, decoding)?
            }
        };

        tracing::info!(
            "Created {} {} device {} ({})",
            info.protocol,
            info.device_type,
            info.id,
            info.name
        );

        Ok(Self::assemble(info, core, decoder, events))
    }

    /// Create a device around an externally built decoder.
    pub fn with_decoder<F>(
        info: RemoteDeviceInfo,
        registry: Arc<SensorRegistry>,
        events: EventBus,
        build: F,
    ) -> Self
    where
        F: FnOnce(&mut DeviceCore) -> Box<dyn FrameDecoder>,
    {
        let mut core = DeviceCore::new(DeviceKey::Remote(info.id), info.device_type, registry);
        let decoder = build(&mut core);
        Self::assemble(info, core, decoder, events)
    }

    fn assemble(
        info: RemoteDeviceInfo,
        mut core: DeviceCore,
        decoder: Box<dyn FrameDecoder>,
        events: EventBus,
    ) -> Self {
        core.sensors_added();

        Self {
            id: info.id,
            name: info.name,
            protocol: info.protocol,
            calibration_factor: info.calibration_factor,
            search_state: SearchState::Idle,
            search_cancel: None,
            metadata: DeviceMetadata::default(),
            decoder,
            events,
            core,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn search_state(&self) -> SearchState {
        self.search_state
    }

    pub fn is_searching(&self) -> bool {
        self.search_state == SearchState::Searching
    }

    pub fn is_receiving_data(&self) -> bool {
        self.search_state == SearchState::ReceivingData
    }

    pub fn calibration_factor(&self) -> f64 {
        self.calibration_factor
    }

    pub fn set_calibration_factor(&mut self, calibration_factor: f64) {
        self.calibration_factor = calibration_factor;
        self.decoder.set_calibration_factor(calibration_factor);
    }

    /// Enter Searching and hand out the cancellation signal for the search.
    pub fn start_searching(&mut self) -> CancelSignal {
        // Replacing an old handle cancels whatever it guarded.
        let (cancel, signal) = SearchCancel::new();
        if let Some(old) = self.search_cancel.replace(cancel) {
            old.cancel();
        }

        self.search_state = SearchState::Searching;
        tracing::info!("Searching for {} {} ({})", self.protocol, self.device_type(), self.id);
        self.events.publish(DeviceEvent::SearchStarted {
            device_id: self.id,
            device_type: self.device_type(),
            protocol: self.protocol,
        });

        signal
    }

    /// Decode one frame and advance the search state.
    pub fn handle_frame(&mut self, frame: &Frame) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();

        if self.core.is_shut_down() {
            return outcome;
        }

        let measured = match self.decoder.decode(frame) {
            DecodeOutcome::Measurement => true,
            DecodeOutcome::Metadata(metadata) => {
                outcome.metadata = self.update_metadata(metadata);
                false
            }
            DecodeOutcome::MeasurementWithMetadata(metadata) => {
                outcome.metadata = self.update_metadata(metadata);
                true
            }
            DecodeOutcome::Ignored => {
                tracing::debug!("Ignored frame from {}: {:?}", self.id, frame);
                false
            }
        };

        if measured && self.search_state != SearchState::ReceivingData {
            outcome.search_succeeded = self.search_state == SearchState::Searching;
            outcome.started_receiving = true;
            self.search_state = SearchState::ReceivingData;
            self.core.register_sensors();

            tracing::info!("{} ({}) is receiving data", self.name, self.id);
            self.events
                .publish(DeviceEvent::ReceivingData { device_id: self.id });
        }

        outcome
    }

    /// Last known manufacturer and battery level.
    pub fn metadata(&self) -> &DeviceMetadata {
        &self.metadata
    }

    /// Merge reported device information. Returns only the fields that changed.
    pub fn update_metadata(&mut self, reported: DeviceMetadata) -> Option<DeviceMetadata> {
        let mut changed = DeviceMetadata::default();

        if reported.manufacturer.is_some() && reported.manufacturer != self.metadata.manufacturer {
            self.metadata.manufacturer = reported.manufacturer.clone();
            changed.manufacturer = reported.manufacturer;
        }
        if reported.battery_percentage.is_some()
            && reported.battery_percentage != self.metadata.battery_percentage
        {
            self.metadata.battery_percentage = reported.battery_percentage;
            changed.battery_percentage = reported.battery_percentage;
        }

        (!changed.is_empty()).then_some(changed)
    }

    /// The protocol layer found the device before any measurement arrived.
    ///
    /// The search is over but the link stays open; the first measurement
    /// moves the device to ReceivingData.
    pub fn search_found(&mut self) {
        if self.search_state == SearchState::Searching {
            self.search_state = SearchState::Idle;
        }
    }

    /// The protocol layer reported that the device was not found.
    pub fn search_failed(&mut self) {
        self.search_cancel = None;
        self.search_state = SearchState::SearchFailed;
        self.core.unregister_sensors();
    }

    /// A receiving device stopped delivering data.
    pub fn connection_lost(&mut self) {
        if let Some(cancel) = self.search_cancel.take() {
            cancel.cancel();
        }
        self.search_state = SearchState::Idle;
        self.decoder.reset();
        self.core.unregister_sensors();
    }

    /// Stop an in-flight search or connection.
    pub fn cancel_search(&mut self) {
        if let Some(cancel) = self.search_cancel.take() {
            cancel.cancel();
        }
        if self.search_state == SearchState::Searching {
            self.search_state = SearchState::Idle;
        }
    }
}

impl Device for RemoteDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    fn shut_down(&mut self) {
        self.cancel_search();
        self.search_state = SearchState::Idle;
        self.core.shut_down();
    }
}

impl std::fmt::Debug for RemoteDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("search_state", &self.search_state)
            .field("calibration_factor", &self.calibration_factor)
            .field("core", &self.core)
            .finish()
    }
}
