//! Track point operations.
//!
//! Coordinates go through [`to_e6`]/[`from_e6`] on every write and read, so a
//! stored location is exact to 1e-6 degrees.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::sequence::TrackPointSequence;
use super::{TrackStore, time_from_millis};
use crate::error::Result;
use crate::geo_utils::{from_e6, to_e6};
use crate::observer::DataChange;
use crate::stats::{ChannelStatistics, SensorStatistics};
use crate::{GpsPoint, TrackId, TrackPoint, TrackPointId, TrackPointType};

const POINT_COLUMNS: &str = "_id, type, longitude, latitude, time, elevation, accuracy, speed, \
     bearing, sensor_heartrate, sensor_cadence, sensor_power, sensor_distance, \
     elevation_gain, elevation_loss";

const INSERT_POINT: &str = "INSERT INTO trackpoints (trackid, type, longitude, latitude, time,
         elevation, accuracy, speed, bearing, sensor_heartrate, sensor_cadence, sensor_power,
         sensor_distance, elevation_gain, elevation_loss)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

fn point_from_row(row: &Row<'_>) -> rusqlite::Result<TrackPoint> {
    let code: i64 = row.get(1)?;
    let point_type = TrackPointType::from_db_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Integer,
            format!("unknown track point type {}", code).into(),
        )
    })?;

    let longitude: Option<i64> = row.get(2)?;
    let latitude: Option<i64> = row.get(3)?;
    let location = match (latitude, longitude) {
        (Some(lat), Some(lon)) => Some(GpsPoint::new(from_e6(lat), from_e6(lon))),
        _ => None,
    };

    Ok(TrackPoint {
        id: Some(TrackPointId(row.get(0)?)),
        point_type,
        time: time_from_millis(4, row.get(4)?)?,
        location,
        altitude: row.get(5)?,
        accuracy: row.get(6)?,
        speed: row.get(7)?,
        bearing: row.get(8)?,
        heart_rate: row.get(9)?,
        cadence: row.get(10)?,
        power: row.get(11)?,
        sensor_distance: row.get(12)?,
        altitude_gain: row.get(13)?,
        altitude_loss: row.get(14)?,
    })
}

/// Insert one point with a cached statement. Runs inside the caller's transaction, if any.
fn insert_point_row(conn: &Connection, point: &TrackPoint, track_id: TrackId) -> Result<TrackPointId> {
    let mut stmt = conn.prepare_cached(INSERT_POINT)?;
    stmt.execute(params![
        track_id.0,
        point.point_type.db_code(),
        point.location.map(|l| to_e6(l.longitude)),
        point.location.map(|l| to_e6(l.latitude)),
        point.time.timestamp_millis(),
        point.altitude,
        point.accuracy,
        point.speed,
        point.bearing,
        point.heart_rate,
        point.cadence,
        point.power,
        point.sensor_distance,
        point.altitude_gain,
        point.altitude_loss,
    ])?;
    Ok(TrackPointId(conn.last_insert_rowid()))
}

fn channel_statistics(row: &Row<'_>, first: usize) -> rusqlite::Result<Option<ChannelStatistics>> {
    let min: Option<f64> = row.get(first)?;
    let max: Option<f64> = row.get(first + 1)?;
    let avg: Option<f64> = row.get(first + 2)?;
    Ok(match (min, max, avg) {
        (Some(min), Some(max), Some(avg)) => Some(ChannelStatistics { min, max, avg }),
        _ => None,
    })
}

impl TrackStore {
    // ========================================================================
    // Inserts
    // ========================================================================

    /// Insert a single point into a track.
    pub fn insert_point(&self, point: &TrackPoint, track_id: TrackId) -> Result<TrackPointId> {
        let id = {
            let conn = self.lock()?;
            insert_point_row(&conn, point, track_id)?
        };
        self.notify(DataChange::PointsInserted { track_id, count: 1 });
        Ok(id)
    }

    /// Insert points into a track as one atomic unit.
    ///
    /// Either every point is stored, with ids assigned in slice order, or none is.
    pub fn bulk_insert_points(
        &self,
        points: &[TrackPoint],
        track_id: TrackId,
    ) -> Result<Vec<TrackPointId>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let ids = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let ids = points
                .iter()
                .map(|point| insert_point_row(&tx, point, track_id))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            ids
        };

        debug!(
            "trackstore: [TrackStore] Inserted {} points into track {}",
            ids.len(),
            track_id
        );
        self.notify(DataChange::PointsInserted {
            track_id,
            count: ids.len(),
        });
        Ok(ids)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Stream a track's points in id order, starting at `start` (inclusive) or the first point.
    pub fn get_point_sequence(
        &self,
        track_id: TrackId,
        start: Option<TrackPointId>,
    ) -> TrackPointSequence<'_> {
        TrackPointSequence::new(self, track_id, start.map(|id| id.0), None)
    }

    /// Last point of a track.
    pub fn get_last_point(&self, track_id: TrackId) -> Result<Option<TrackPoint>> {
        let conn = self.lock()?;
        let point = conn
            .query_row(
                &format!(
                    "SELECT {} FROM trackpoints WHERE trackid = ? ORDER BY _id DESC LIMIT 1",
                    POINT_COLUMNS
                ),
                params![track_id.0],
                point_from_row,
            )
            .optional()?;
        Ok(point)
    }

    /// Id of the last point of a track.
    pub fn get_last_point_id(&self, track_id: TrackId) -> Result<Option<TrackPointId>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT MAX(_id) FROM trackpoints WHERE trackid = ?",
                params![track_id.0],
                |row| row.get::<_, Option<i64>>(0),
            )?
            .map(TrackPointId);
        Ok(id)
    }

    /// Last point that is an ordinary sample or an automatic segment start.
    pub fn get_last_valid_point(&self, track_id: TrackId) -> Result<Option<TrackPoint>> {
        let conn = self.lock()?;
        let point = conn
            .query_row(
                &format!(
                    "SELECT {} FROM trackpoints WHERE trackid = ?1 AND type IN (?2, ?3)
                     ORDER BY _id DESC LIMIT 1",
                    POINT_COLUMNS
                ),
                params![
                    track_id.0,
                    TrackPointType::TrackPoint.db_code(),
                    TrackPointType::SegmentStartAutomatic.db_code(),
                ],
                point_from_row,
            )
            .optional()?;
        Ok(point)
    }

    /// Id of the most recent point recorded at or before `time`.
    pub fn get_point_id_at_or_before(
        &self,
        track_id: TrackId,
        time: DateTime<Utc>,
    ) -> Result<Option<TrackPointId>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT _id FROM trackpoints WHERE trackid = ?1 AND time <= ?2
                 ORDER BY time DESC, _id DESC LIMIT 1",
                params![track_id.0, time.timestamp_millis()],
                |row| row.get(0).map(TrackPointId),
            )
            .optional()?;
        Ok(id)
    }

    /// Number of points in a track.
    pub fn get_point_count(&self, track_id: TrackId) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trackpoints WHERE trackid = ?",
            params![track_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Min/max/average of the heart rate, cadence and power channels.
    ///
    /// A channel with no recorded value is `None`.
    pub fn get_sensor_statistics(&self, track_id: TrackId) -> Result<SensorStatistics> {
        let conn = self.lock()?;
        let stats = conn.query_row(
            "SELECT MIN(sensor_heartrate), MAX(sensor_heartrate), AVG(sensor_heartrate),
                    MIN(sensor_cadence), MAX(sensor_cadence), AVG(sensor_cadence),
                    MIN(sensor_power), MAX(sensor_power), AVG(sensor_power)
             FROM trackpoints WHERE trackid = ?",
            params![track_id.0],
            |row| {
                Ok(SensorStatistics {
                    heart_rate: channel_statistics(row, 0)?,
                    cadence: channel_statistics(row, 3)?,
                    power: channel_statistics(row, 6)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Fetch up to `limit` points of a track with id >= `from_id`, in id order.
    pub(crate) fn fetch_point_window(
        &self,
        track_id: TrackId,
        from_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TrackPoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM trackpoints WHERE trackid = ?1 AND _id >= ?2 ORDER BY _id LIMIT ?3",
            POINT_COLUMNS
        ))?;
        let points = stmt
            .query_map(
                params![track_id.0, from_id.unwrap_or(i64::MIN), limit as i64],
                point_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(points)
    }
}
