//! Device persistence using rusqlite.

use crate::devices::{DeviceId, DeviceType, Protocol};
use crate::storage::device_store::{DeviceRecord, DeviceStore};
use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use crate::storage::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SELECT_DEVICE: &str = "SELECT id, name, device_type, protocol, paired, calibration_factor,
     ant_device_number, bluetooth_mac_address, manufacturer, battery_percentage,
     last_seen_at, created_at FROM devices";

/// SQLite-backed [`DeviceStore`].
pub struct SqliteDeviceStore {
    conn: Mutex<Connection>,
}

impl SqliteDeviceStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

        let current_version = Self::schema_version(&conn)?;
        if current_version < CURRENT_VERSION {
            Self::migrate(&conn, current_version)?;
        }

        Ok(())
    }

    fn schema_version(conn: &Connection) -> Result<i32, StoreError> {
        let result: SqliteResult<i32> = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(StoreError::QueryFailed(e.to_string())),
        }
    }

    /// Get the current schema version.
    pub fn get_schema_version(&self) -> Result<i32, StoreError> {
        Self::schema_version(&*self.conn()?)
    }

    fn migrate(conn: &Connection, from_version: i32) -> Result<(), StoreError> {
        if from_version < 1 {
            conn.execute_batch(SCHEMA)
                .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                [CURRENT_VERSION],
            )
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

            tracing::info!("Device database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    fn write(conn: &Connection, record: &DeviceRecord) -> Result<usize, StoreError> {
        conn.execute(
            "UPDATE devices SET name = ?2, device_type = ?3, protocol = ?4, paired = ?5,
             calibration_factor = ?6, ant_device_number = ?7, bluetooth_mac_address = ?8,
             manufacturer = ?9, battery_percentage = ?10, last_seen_at = ?11
             WHERE id = ?1",
            params![
                record.id,
                record.name,
                device_type_to_str(record.device_type),
                protocol_to_str(record.protocol),
                record.paired as i32,
                record.calibration_factor,
                record.ant_device_number,
                record.bluetooth_mac_address,
                record.manufacturer,
                record.battery_percentage,
                record.last_seen_at.map(|dt| dt.to_rfc3339()),
            ],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }
}

impl DeviceStore for SqliteDeviceStore {
    fn device(&self, id: DeviceId) -> Result<Option<DeviceRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_DEVICE} WHERE id = ?1"))
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let row = stmt
            .query_row(params![id], DeviceRow::from_row)
            .optional()
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        row.map(DeviceRow::into_record).transpose()
    }

    fn devices(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_DEVICE} ORDER BY id ASC"))
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], DeviceRow::from_row)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut devices = Vec::new();
        for row in rows {
            let row = row.map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            devices.push(row.into_record()?);
        }

        Ok(devices)
    }

    fn insert_device(&self, record: &DeviceRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO devices (id, name, device_type, protocol, paired, calibration_factor,
             ant_device_number, bluetooth_mac_address, manufacturer, battery_percentage,
             last_seen_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id,
                record.name,
                device_type_to_str(record.device_type),
                protocol_to_str(record.protocol),
                record.paired as i32,
                record.calibration_factor,
                record.ant_device_number,
                record.bluetooth_mac_address,
                record.manufacturer,
                record.battery_percentage,
                record.last_seen_at.map(|dt| dt.to_rfc3339()),
                record.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(record.id))
            }
            Err(e) => Err(StoreError::QueryFailed(e.to_string())),
        }
    }

    fn update(
        &self,
        id: DeviceId,
        change: &mut dyn FnMut(&mut DeviceRecord),
    ) -> Result<(), StoreError> {
        let mut record = self.require(id)?;
        change(&mut record);

        let conn = self.conn()?;
        if Self::write(&conn, &record)? == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

fn device_type_to_str(device_type: DeviceType) -> String {
    format!("{:?}", device_type).to_lowercase()
}

fn protocol_to_str(protocol: Protocol) -> String {
    format!("{:?}", protocol).to_lowercase()
}

/// Intermediate struct for reading device rows from database.
struct DeviceRow {
    id: i64,
    name: String,
    device_type: String,
    protocol: String,
    paired: i32,
    calibration_factor: f64,
    ant_device_number: Option<u16>,
    bluetooth_mac_address: Option<String>,
    manufacturer: Option<String>,
    battery_percentage: Option<u8>,
    last_seen_at: Option<String>,
    created_at: String,
}

impl DeviceRow {
    fn from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            device_type: row.get(2)?,
            protocol: row.get(3)?,
            paired: row.get(4)?,
            calibration_factor: row.get(5)?,
            ant_device_number: row.get(6)?,
            bluetooth_mac_address: row.get(7)?,
            manufacturer: row.get(8)?,
            battery_percentage: row.get(9)?,
            last_seen_at: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<DeviceRecord, StoreError> {
        let device_type = match self.device_type.as_str() {
            "clock" => DeviceType::Clock,
            "gps" => DeviceType::Gps,
            "fusedlocation" => DeviceType::FusedLocation,
            "networklocation" => DeviceType::NetworkLocation,
            "altitudefrompressure" => DeviceType::AltitudeFromPressure,
            "verticalspeedandslope" => DeviceType::VerticalSpeedAndSlope,
            "heartrate" => DeviceType::HeartRate,
            "bikespeed" => DeviceType::BikeSpeed,
            "bikecadence" => DeviceType::BikeCadence,
            "bikespeedandcadence" => DeviceType::BikeSpeedAndCadence,
            "bikepower" => DeviceType::BikePower,
            "runspeed" => DeviceType::RunSpeed,
            _ => {
                return Err(StoreError::DeserializationError(format!(
                    "Unknown device type: {}",
                    self.device_type
                )))
            }
        };

        let protocol = match self.protocol.as_str() {
            "antplus" => Protocol::AntPlus,
            "bluetoothle" => Protocol::BluetoothLe,
            _ => {
                return Err(StoreError::DeserializationError(format!(
                    "Unknown protocol: {}",
                    self.protocol
                )))
            }
        };

        let last_seen_at = self
            .last_seen_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| {
                StoreError::DeserializationError(format!("Invalid last_seen_at date: {}", e))
            })?;

        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                StoreError::DeserializationError(format!("Invalid created_at date: {}", e))
            })?;

        Ok(DeviceRecord {
            id: self.id,
            name: self.name,
            device_type,
            protocol,
            paired: self.paired != 0,
            calibration_factor: self.calibration_factor,
            ant_device_number: self.ant_device_number,
            bluetooth_mac_address: self.bluetooth_mac_address,
            manufacturer: self.manufacturer,
            battery_percentage: self.battery_percentage,
            last_seen_at,
            created_at,
        })
    }
}
