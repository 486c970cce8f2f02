//! Database schema definitions.

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// SQL for the schema version table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Remote devices
CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    device_type TEXT NOT NULL,
    protocol TEXT NOT NULL,
    paired INTEGER NOT NULL DEFAULT 1,
    calibration_factor REAL NOT NULL DEFAULT 1.0,
    ant_device_number INTEGER,
    bluetooth_mac_address TEXT,
    manufacturer TEXT,
    battery_percentage INTEGER,
    last_seen_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_devices_paired ON devices(paired);
"#;
