//! Database schema, applied as ordered migrations.
//!
//! Coordinates are stored as E6 integers (see [`crate::geo_utils::to_e6`]),
//! timestamps as epoch milliseconds and durations as milliseconds.

use log::info;
use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};

use crate::error::Result;

const CREATE_TRACKS: &str = r#"
CREATE TABLE tracks (
    _id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid BLOB NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    icon TEXT NOT NULL DEFAULT '',
    starttime INTEGER,
    stoptime INTEGER,
    totaldistance REAL NOT NULL DEFAULT 0,
    totaltime INTEGER NOT NULL DEFAULT 0,
    movingtime INTEGER NOT NULL DEFAULT 0,
    avgspeed REAL NOT NULL DEFAULT 0,
    avgmovingspeed REAL NOT NULL DEFAULT 0,
    maxspeed REAL NOT NULL DEFAULT 0,
    minelevation REAL,
    maxelevation REAL,
    elevationgain REAL,
    elevationloss REAL,
    CHECK (starttime IS NULL OR stoptime IS NULL OR stoptime >= starttime)
);
"#;

const CREATE_TRACKPOINTS: &str = r#"
CREATE TABLE trackpoints (
    _id INTEGER PRIMARY KEY AUTOINCREMENT,
    trackid INTEGER NOT NULL REFERENCES tracks(_id) ON DELETE CASCADE,
    type INTEGER NOT NULL CHECK (type IN (-2, -1, 0, 1)),
    longitude INTEGER CHECK (longitude BETWEEN -180000000 AND 180000000),
    latitude INTEGER CHECK (latitude BETWEEN -90000000 AND 90000000),
    time INTEGER NOT NULL,
    elevation REAL,
    accuracy REAL,
    speed REAL,
    bearing REAL,
    sensor_heartrate REAL,
    sensor_cadence REAL,
    sensor_power REAL,
    sensor_distance REAL,
    elevation_gain REAL,
    elevation_loss REAL,
    CHECK ((latitude IS NULL) = (longitude IS NULL)),
    CHECK (latitude IS NOT NULL OR type IN (-2, -1, 1))
);

CREATE INDEX idx_trackpoints_track ON trackpoints(trackid, _id);
CREATE INDEX idx_trackpoints_track_time ON trackpoints(trackid, time);
"#;

const CREATE_MARKERS: &str = r#"
CREATE TABLE markers (
    _id INTEGER PRIMARY KEY AUTOINCREMENT,
    trackid INTEGER NOT NULL REFERENCES tracks(_id) ON DELETE CASCADE,
    name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    icon TEXT NOT NULL DEFAULT '',
    length REAL NOT NULL DEFAULT 0,
    duration INTEGER NOT NULL DEFAULT 0,
    longitude INTEGER NOT NULL CHECK (longitude BETWEEN -180000000 AND 180000000),
    latitude INTEGER NOT NULL CHECK (latitude BETWEEN -90000000 AND 90000000),
    time INTEGER NOT NULL,
    elevation REAL,
    accuracy REAL,
    bearing REAL,
    photourl TEXT
);

CREATE INDEX idx_markers_track ON markers(trackid, _id);
"#;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(CREATE_TRACKS),
        M::up(CREATE_TRACKPOINTS),
        M::up(CREATE_MARKERS),
    ])
}

/// Bring the schema up to date and enable foreign keys.
pub fn apply(conn: &mut Connection) -> Result<()> {
    migrations().to_latest(conn)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    info!("trackstore: [migrations] Schema is up to date");
    Ok(())
}

/// Current schema version (`user_version`).
pub fn schema_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}
