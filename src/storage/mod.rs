//! Storage module for device persistence and configuration.

pub mod config;
pub mod database;
pub mod device_store;
pub mod schema;

use crate::devices::DeviceId;
use thiserror::Error;

pub use config::{
    AltitudeSettings, AppConfig, ConfigError, DecodingSettings, LocationSettings, SearchSettings,
};
pub use database::SqliteDeviceStore;
pub use device_store::{default_calibration_factor, DeviceRecord, DeviceStore, InMemoryDeviceStore};

/// Device store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Device not found: {0}")]
    NotFound(DeviceId),

    #[error("Device already stored: {0}")]
    Duplicate(DeviceId),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Store lock poisoned")]
    Poisoned,
}
