//! Track CRUD operations.
//!
//! Deleting a track removes its points and markers first and the track row
//! last, all inside one transaction. Photos are removed after the commit so a
//! failed delete never leaves surviving markers without their assets. Once the
//! rows are gone the delete succeeds: photo cleanup failures are only logged.

use log::{debug, info, warn};
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use uuid::Uuid;

use super::{TrackStore, duration_from_millis, duration_to_millis, placeholders, time_from_millis};
use crate::error::Result;
use crate::observer::DataChange;
use crate::stats::{TrackStatistics, TrackStatisticsUpdater};
use crate::{Track, TrackId};

const TRACK_COLUMNS: &str = "_id, uuid, name, description, category, icon, starttime, stoptime, \
     totaldistance, totaltime, movingtime, maxspeed, minelevation, maxelevation, \
     elevationgain, elevationloss";

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    let uuid_bytes: Vec<u8> = row.get(1)?;
    let uuid = Uuid::from_slice(&uuid_bytes).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Blob, Box::new(e))
    })?;

    let start_time = row
        .get::<_, Option<i64>>(6)?
        .map(|ms| time_from_millis(6, ms))
        .transpose()?;
    let stop_time = row
        .get::<_, Option<i64>>(7)?
        .map(|ms| time_from_millis(7, ms))
        .transpose()?;

    Ok(Track {
        id: Some(TrackId(row.get(0)?)),
        uuid,
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        icon: row.get(5)?,
        statistics: TrackStatistics {
            start_time,
            stop_time,
            total_distance: row.get(8)?,
            total_time: duration_from_millis(row.get(9)?),
            moving_time: duration_from_millis(row.get(10)?),
            max_speed: row.get(11)?,
            min_altitude: row.get(12)?,
            max_altitude: row.get(13)?,
            total_altitude_gain: row.get(14)?,
            total_altitude_loss: row.get(15)?,
        },
    })
}

impl TrackStore {
    // ========================================================================
    // Inserts and updates
    // ========================================================================

    /// Insert a track and return its store id. `track.id` is ignored.
    pub fn insert_track(&self, track: &Track) -> Result<TrackId> {
        let stats = &track.statistics;
        let id = {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO tracks (uuid, name, description, category, icon, starttime, stoptime,
                     totaldistance, totaltime, movingtime, avgspeed, avgmovingspeed, maxspeed,
                     minelevation, maxelevation, elevationgain, elevationloss)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    track.uuid.as_bytes().as_slice(),
                    track.name,
                    track.description,
                    track.category,
                    track.icon,
                    stats.start_time.map(|t| t.timestamp_millis()),
                    stats.stop_time.map(|t| t.timestamp_millis()),
                    stats.total_distance,
                    duration_to_millis(stats.total_time),
                    duration_to_millis(stats.moving_time),
                    stats.average_speed(),
                    stats.average_moving_speed(),
                    stats.max_speed,
                    stats.min_altitude,
                    stats.max_altitude,
                    stats.total_altitude_gain,
                    stats.total_altitude_loss,
                ],
            )?;
            TrackId(conn.last_insert_rowid())
        };

        debug!("trackstore: [TrackStore] Inserted track {} ({})", id, track.uuid);
        self.notify(DataChange::TrackInserted(id));
        Ok(id)
    }

    /// Update a track's header and statistics.
    ///
    /// Returns false if the track has no id or no longer exists.
    pub fn update_track(&self, track: &Track) -> Result<bool> {
        let Some(id) = track.id else {
            return Ok(false);
        };
        let stats = &track.statistics;
        let updated = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE tracks SET uuid = ?2, name = ?3, description = ?4, category = ?5, icon = ?6,
                     starttime = ?7, stoptime = ?8, totaldistance = ?9, totaltime = ?10,
                     movingtime = ?11, avgspeed = ?12, avgmovingspeed = ?13, maxspeed = ?14,
                     minelevation = ?15, maxelevation = ?16, elevationgain = ?17, elevationloss = ?18
                 WHERE _id = ?1",
                params![
                    id.0,
                    track.uuid.as_bytes().as_slice(),
                    track.name,
                    track.description,
                    track.category,
                    track.icon,
                    stats.start_time.map(|t| t.timestamp_millis()),
                    stats.stop_time.map(|t| t.timestamp_millis()),
                    stats.total_distance,
                    duration_to_millis(stats.total_time),
                    duration_to_millis(stats.moving_time),
                    stats.average_speed(),
                    stats.average_moving_speed(),
                    stats.max_speed,
                    stats.min_altitude,
                    stats.max_altitude,
                    stats.total_altitude_gain,
                    stats.total_altitude_loss,
                ],
            )? == 1
        };

        if updated {
            self.notify(DataChange::TrackUpdated(id));
        }
        Ok(updated)
    }

    /// Recompute a track's statistics from its stored points.
    ///
    /// Returns the new statistics, or `None` if the track does not exist.
    pub fn recompute_track_statistics(&self, track_id: TrackId) -> Result<Option<TrackStatistics>> {
        let Some(mut track) = self.get_track(track_id)? else {
            return Ok(None);
        };

        let mut updater = TrackStatisticsUpdater::new();
        for point in self.get_point_sequence(track_id, None) {
            updater.add_point(&point?);
        }
        debug!(
            "trackstore: [TrackStore] Recomputed statistics of track {} from {} points",
            track_id,
            updater.point_count()
        );

        track.statistics = updater.into_statistics();
        self.update_track(&track)?;
        Ok(Some(track.statistics))
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Get a track by id.
    pub fn get_track(&self, track_id: TrackId) -> Result<Option<Track>> {
        let conn = self.lock()?;
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE _id = ?", TRACK_COLUMNS),
                params![track_id.0],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    /// Get a track by its UUID.
    pub fn get_track_by_uuid(&self, uuid: &Uuid) -> Result<Option<Track>> {
        let conn = self.lock()?;
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE uuid = ?", TRACK_COLUMNS),
                params![uuid.as_bytes().as_slice()],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    /// Get all tracks ordered by id.
    pub fn get_tracks(&self) -> Result<Vec<Track>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM tracks ORDER BY _id", TRACK_COLUMNS))?;
        let tracks = stmt
            .query_map([], track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Delete a track with all of its points, markers and photos.
    pub fn delete_track(&self, track_id: TrackId) -> Result<()> {
        self.delete_tracks(&[track_id])
    }

    /// Delete several tracks with all of their points, markers and photos.
    pub fn delete_tracks(&self, track_ids: &[TrackId]) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }

        let ids = placeholders(track_ids.len());
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let raw_ids = || params_from_iter(track_ids.iter().map(|id| id.0));
            tx.execute(&format!("DELETE FROM trackpoints WHERE trackid IN ({})", ids), raw_ids())?;
            tx.execute(&format!("DELETE FROM markers WHERE trackid IN ({})", ids), raw_ids())?;
            // Tracks go last: this is the delete that may compact the file.
            tx.execute(&format!("DELETE FROM tracks WHERE _id IN ({})", ids), raw_ids())?;
            tx.commit()?;

            if self.config().vacuum_on_delete {
                conn.execute_batch("VACUUM")?;
            }
        }

        if let Some(photos) = self.photos() {
            for &track_id in track_ids {
                if let Err(e) = photos.delete_track_photos(track_id) {
                    warn!(
                        "trackstore: [TrackStore] Failed to delete photos of track {}: {}",
                        track_id, e
                    );
                }
            }
        }

        info!("trackstore: [TrackStore] Deleted {} tracks", track_ids.len());
        self.notify(DataChange::TracksDeleted(track_ids.to_vec()));
        Ok(())
    }

    /// Delete every track, marker, point and photo.
    pub fn delete_all_tracks(&self) -> Result<()> {
        let track_ids: Vec<TrackId> = {
            let mut conn = self.lock()?;
            let ids = conn
                .prepare("SELECT _id FROM tracks ORDER BY _id")?
                .query_map([], |row| row.get(0).map(TrackId))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let tx = conn.transaction()?;
            tx.execute("DELETE FROM trackpoints", [])?;
            tx.execute("DELETE FROM markers", [])?;
            tx.execute("DELETE FROM tracks", [])?;
            tx.commit()?;

            if self.config().vacuum_on_delete {
                conn.execute_batch("VACUUM")?;
            }
            ids
        };

        if let Some(photos) = self.photos() {
            if let Err(e) = photos.delete_all() {
                warn!("trackstore: [TrackStore] Failed to delete photo root: {}", e);
            }
        }

        info!("trackstore: [TrackStore] Deleted all {} tracks", track_ids.len());
        self.notify(DataChange::TracksDeleted(track_ids));
        Ok(())
    }
}
