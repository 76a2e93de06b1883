//! Marker CRUD operations.

use log::{debug, warn};
use rusqlite::{OptionalExtension, Row, params};

use super::sequence::MarkerSequence;
use super::{TrackStore, duration_from_millis, duration_to_millis, time_from_millis};
use crate::error::Result;
use crate::geo_utils::{from_e6, to_e6};
use crate::observer::DataChange;
use crate::{GpsPoint, Marker, MarkerId, TrackId};

const MARKER_COLUMNS: &str = "_id, trackid, name, description, category, icon, length, duration, \
     longitude, latitude, time, elevation, accuracy, bearing, photourl";

fn marker_from_row(row: &Row<'_>) -> rusqlite::Result<Marker> {
    Ok(Marker {
        id: Some(MarkerId(row.get(0)?)),
        track_id: TrackId(row.get(1)?),
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        icon: row.get(5)?,
        length: row.get(6)?,
        duration: duration_from_millis(row.get(7)?),
        location: GpsPoint::new(from_e6(row.get(9)?), from_e6(row.get(8)?)),
        time: time_from_millis(10, row.get(10)?)?,
        altitude: row.get(11)?,
        accuracy: row.get(12)?,
        bearing: row.get(13)?,
        photo_url: row.get(14)?,
    })
}

impl TrackStore {
    /// Insert a marker and return its store id. `marker.id` is ignored.
    pub fn insert_marker(&self, marker: &Marker) -> Result<MarkerId> {
        let id = {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO markers (trackid, name, description, category, icon, length, duration,
                     longitude, latitude, time, elevation, accuracy, bearing, photourl)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    marker.track_id.0,
                    marker.name,
                    marker.description,
                    marker.category,
                    marker.icon,
                    marker.length,
                    duration_to_millis(marker.duration),
                    to_e6(marker.location.longitude),
                    to_e6(marker.location.latitude),
                    marker.time.timestamp_millis(),
                    marker.altitude,
                    marker.accuracy,
                    marker.bearing,
                    marker.photo_url,
                ],
            )?;
            MarkerId(conn.last_insert_rowid())
        };

        debug!(
            "trackstore: [TrackStore] Inserted marker {} on track {}",
            id.0, marker.track_id
        );
        self.notify(DataChange::MarkerInserted {
            track_id: marker.track_id,
            marker_id: id,
        });
        Ok(id)
    }

    /// Update a marker.
    ///
    /// If the stored marker had a photo and the update removes it, the photo
    /// asset is deleted. Returns false if the marker has no id or no longer exists.
    pub fn update_marker(&self, marker: &Marker) -> Result<bool> {
        let Some(id) = marker.id else {
            return Ok(false);
        };
        let Some(saved) = self.get_marker(id)? else {
            return Ok(false);
        };

        let updated = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE markers SET trackid = ?2, name = ?3, description = ?4, category = ?5,
                     icon = ?6, length = ?7, duration = ?8, longitude = ?9, latitude = ?10,
                     time = ?11, elevation = ?12, accuracy = ?13, bearing = ?14, photourl = ?15
                 WHERE _id = ?1",
                params![
                    id.0,
                    marker.track_id.0,
                    marker.name,
                    marker.description,
                    marker.category,
                    marker.icon,
                    marker.length,
                    duration_to_millis(marker.duration),
                    to_e6(marker.location.longitude),
                    to_e6(marker.location.latitude),
                    marker.time.timestamp_millis(),
                    marker.altitude,
                    marker.accuracy,
                    marker.bearing,
                    marker.photo_url,
                ],
            )? == 1
        };

        if updated && saved.has_photo() && !marker.has_photo() {
            self.delete_marker_photo(&saved);
        }

        if updated {
            self.notify(DataChange::MarkerUpdated {
                track_id: marker.track_id,
                marker_id: id,
            });
        }
        Ok(updated)
    }

    /// Delete a marker and its photo. Returns false if it did not exist.
    pub fn delete_marker(&self, marker_id: MarkerId) -> Result<bool> {
        let Some(saved) = self.get_marker(marker_id)? else {
            return Ok(false);
        };

        let deleted = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM markers WHERE _id = ?", params![marker_id.0])? == 1
        };
        if deleted && saved.has_photo() {
            self.delete_marker_photo(&saved);
        }

        if deleted {
            self.notify(DataChange::MarkerDeleted {
                track_id: saved.track_id,
                marker_id,
            });
        }
        Ok(deleted)
    }

    /// Remove a marker's photo once its row change is committed. Failures are logged.
    fn delete_marker_photo(&self, marker: &Marker) {
        if let (Some(photos), Some(url)) = (self.photos(), marker.photo_url.as_deref()) {
            if let Err(e) = photos.delete_photo(marker.track_id, url) {
                warn!(
                    "trackstore: [TrackStore] Failed to delete photo '{}' of track {}: {}",
                    url, marker.track_id, e
                );
            }
        }
    }

    /// Get a marker by id.
    pub fn get_marker(&self, marker_id: MarkerId) -> Result<Option<Marker>> {
        let conn = self.lock()?;
        let marker = conn
            .query_row(
                &format!("SELECT {} FROM markers WHERE _id = ?", MARKER_COLUMNS),
                params![marker_id.0],
                marker_from_row,
            )
            .optional()?;
        Ok(marker)
    }

    /// Stream a track's markers in id order.
    ///
    /// Starts at `min_marker_id` (inclusive) when given and stops after
    /// `max_count` markers when given.
    pub fn get_marker_sequence(
        &self,
        track_id: TrackId,
        min_marker_id: Option<MarkerId>,
        max_count: Option<usize>,
    ) -> MarkerSequence<'_> {
        MarkerSequence::new(self, track_id, min_marker_id.map(|id| id.0), max_count)
    }

    /// Collect all markers of a track.
    pub fn get_markers(&self, track_id: TrackId) -> Result<Vec<Marker>> {
        self.get_marker_sequence(track_id, None, None).collect()
    }

    /// Number of markers on a track.
    pub fn get_marker_count(&self, track_id: TrackId) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM markers WHERE trackid = ?",
            params![track_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number to give the next marker of a track (markers are numbered from 1).
    pub fn get_next_marker_number(&self, track_id: TrackId) -> Result<usize> {
        Ok(self.get_marker_count(track_id)? + 1)
    }

    /// Fetch up to `limit` markers of a track with id >= `from_id`, in id order.
    pub(crate) fn fetch_marker_window(
        &self,
        track_id: TrackId,
        from_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Marker>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM markers WHERE trackid = ?1 AND _id >= ?2 ORDER BY _id LIMIT ?3",
            MARKER_COLUMNS
        ))?;
        let markers = stmt
            .query_map(
                params![track_id.0, from_id.unwrap_or(i64::MIN), limit as i64],
                marker_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(markers)
    }
}
