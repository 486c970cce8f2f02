//! Protocol transports and search drivers.
//!
//! The device manager hands every search to a [`SearchDriver`]. The driver
//! talks to the protocol stack and reports back through a [`SearchReporter`]:
//! raw frames, device metadata, "search stopped, not found" and
//! "connection lost". Each search carries a [`CancelSignal`]; once it fires
//! the driver must stop all protocol I/O for that device without reporting.

pub mod ble;
pub mod driver;
pub mod simulated;

use crate::devices::{DeviceId, DeviceMetadata, DeviceType, Frame, Protocol};
use crate::manager::DeviceManager;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;

pub use ble::BleTransport;
pub use driver::{FrameStream, ProtocolTransport, TokioSearchDriver, TransportEvent};
pub use simulated::{SimulatedBehaviour, SimulatedTransport};

/// Protocol address of a remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAddress {
    /// Bluetooth MAC address, e.g. `C4:7C:8D:6A:12:34`
    Bluetooth(String),
    /// ANT+ device number
    Ant { device_number: u16 },
}

/// Everything a driver needs to search for one device.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub protocol: Protocol,
    pub address: DeviceAddress,
    /// Give up if no measurement arrived within this time
    pub timeout: Duration,
    pub cancel: CancelSignal,
}

/// Owner side of a per-search cancellation signal.
///
/// Dropping it cancels as well.
#[derive(Debug)]
pub struct SearchCancel {
    tx: watch::Sender<bool>,
}

impl SearchCancel {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side of a per-search cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the search is cancelled or its owner is gone.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Starts protocol searches on behalf of the device manager.
///
/// `begin_search` must not call back into the manager synchronously; the
/// manager holds its state lock while starting a search.
pub trait SearchDriver: Send + Sync {
    fn begin_search(&self, request: SearchRequest, reporter: SearchReporter);
}

/// Callback handle from a driver into the device manager.
#[derive(Debug, Clone)]
pub struct SearchReporter {
    manager: Weak<DeviceManager>,
}

impl SearchReporter {
    pub(crate) fn new(manager: Weak<DeviceManager>) -> Self {
        Self { manager }
    }

    /// Deliver a raw frame. Returns true once the device is receiving data.
    pub fn frame(&self, device_id: DeviceId, frame: Frame) -> bool {
        self.manager
            .upgrade()
            .map(|m| m.deliver_frame(device_id, frame))
            .unwrap_or(false)
    }

    pub fn metadata(&self, device_id: DeviceId, metadata: DeviceMetadata) {
        if let Some(manager) = self.manager.upgrade() {
            manager.deliver_metadata(device_id, metadata);
        }
    }

    /// The protocol layer gave up on the device.
    pub fn not_found(&self, device_id: DeviceId) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_search_stopped(device_id, false);
        }
    }

    /// A device that was delivering data went away.
    pub fn connection_lost(&self, device_id: DeviceId) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_connection_lost(device_id);
        }
    }
}
