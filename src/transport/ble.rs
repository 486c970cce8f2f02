//! Bluetooth LE transport using btleplug.

use crate::devices::ble::{
    measurement_characteristic_for, service_for, BATTERY_LEVEL_UUID, MANUFACTURER_NAME_UUID,
};
use crate::devices::Frame;
use crate::sensors::SensorError;
use crate::transport::driver::{FrameStream, ProtocolTransport, TransportEvent};
use crate::transport::{DeviceAddress, SearchRequest};
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;

/// Poll period while waiting for the wanted address to show up in a scan.
const SCAN_POLL: Duration = Duration::from_millis(500);

/// Finds paired devices by MAC address and streams their measurement
/// notifications.
#[derive(Debug, Clone)]
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    /// Use the first Bluetooth adapter of the host.
    pub async fn new() -> Result<Self, SensorError> {
        tracing::info!("Initializing Bluetooth LE transport");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(SensorError::AdapterNotFound)?;

        tracing::info!("BLE adapter initialized");
        Ok(Self { adapter })
    }

    /// Scan until a peripheral with the given address appears.
    async fn find(adapter: &Adapter, mac_address: &str) -> Result<Peripheral, SensorError> {
        let mut interval = tokio::time::interval(SCAN_POLL);
        loop {
            interval.tick().await;

            let peripherals = adapter
                .peripherals()
                .await
                .map_err(|e| SensorError::BleError(e.to_string()))?;

            for peripheral in peripherals {
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                if properties
                    .address
                    .to_string()
                    .eq_ignore_ascii_case(mac_address)
                {
                    return Ok(peripheral);
                }
            }
        }
    }

    async fn open(adapter: Adapter, request: SearchRequest) -> Result<FrameStream, SensorError> {
        let DeviceAddress::Bluetooth(mac_address) = &request.address else {
            return Err(SensorError::MissingAddress(request.device_id));
        };
        let unsupported = || SensorError::Unsupported(format!("{} over BLE", request.device_type));
        let service = service_for(request.device_type).ok_or_else(unsupported)?;
        let measurement =
            measurement_characteristic_for(request.device_type).ok_or_else(unsupported)?;

        tracing::info!("Scanning for {} ({})", mac_address, request.device_type);
        adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let found = Self::find(&adapter, mac_address).await;
        if let Err(e) = adapter.stop_scan().await {
            tracing::debug!("Failed to stop scan: {}", e);
        }
        let peripheral = found?;

        peripheral
            .connect()
            .await
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;
        let guard = DisconnectOnDrop(peripheral.clone());

        peripheral
            .discover_services()
            .await
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        let mut initial = Vec::new();
        let mut subscribed = false;
        for characteristic in peripheral.characteristics() {
            if characteristic.uuid == measurement {
                peripheral
                    .subscribe(&characteristic)
                    .await
                    .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;
                subscribed = true;
                tracing::debug!("Subscribed to characteristic: {}", characteristic.uuid);
            } else if characteristic.uuid == BATTERY_LEVEL_UUID
                || characteristic.uuid == MANUFACTURER_NAME_UUID
            {
                match peripheral.read(&characteristic).await {
                    Ok(data) => initial.push(TransportEvent::Frame(Frame::Ble {
                        characteristic: characteristic.uuid,
                        data,
                    })),
                    Err(e) => tracing::debug!("Failed to read {}: {}", characteristic.uuid, e),
                }
            }
        }

        if !subscribed {
            return Err(SensorError::SubscriptionFailed(format!(
                "{} has no measurement characteristic {}",
                mac_address, measurement
            )));
        }

        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        tracing::info!("Connected to {} ({})", mac_address, request.device_id);

        let notifications = notifications.map(move |notification| {
            let _connected = &guard;
            TransportEvent::Frame(Frame::Ble {
                characteristic: notification.uuid,
                data: notification.value,
            })
        });

        Ok(stream::iter(initial).chain(notifications).boxed())
    }
}

impl ProtocolTransport for BleTransport {
    fn connect(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<FrameStream, SensorError>> + Send {
        Self::open(self.adapter.clone(), request.clone())
    }
}

/// Disconnects the peripheral once its notification stream is dropped.
struct DisconnectOnDrop(Peripheral);

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        let peripheral = self.0.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    tracing::debug!("Disconnect failed: {}", e);
                }
            });
        }
    }
}
