//! Forward-only sequences over bounded result windows.
//!
//! A track can hold far more points than fit in one materialized result. A
//! [`Sequence`] reads at most `result_window_rows` rows per query and, when a
//! window is exhausted, issues a continuation query for ids `>=` the last id it
//! returned, dropping that already-returned row. The consumer only sees a plain
//! iterator.
//!
//! The store lock is taken for the duration of one window query and released
//! before any row is handed out, so a writer can interleave between windows.
//! Rows committed behind the cursor in the meantime are picked up by the next
//! continuation query.
//!
//! Dropping a sequence releases its window on every exit path.

use std::collections::VecDeque;

use log::{debug, trace};

use super::TrackStore;
use crate::error::{Result, StoreError};
use crate::{Marker, TrackId, TrackPoint};

/// A row type that can be streamed by id from one track.
pub trait SequenceItem: Sized {
    /// Name used in log messages.
    const KIND: &'static str;

    /// Fetch up to `limit` rows of `track_id` with id >= `from_id`, in id order.
    fn fetch_window(
        store: &TrackStore,
        track_id: TrackId,
        from_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Self>>;

    /// Store id of a fetched row.
    fn row_id(&self) -> i64;
}

impl SequenceItem for TrackPoint {
    const KIND: &'static str = "points";

    fn fetch_window(
        store: &TrackStore,
        track_id: TrackId,
        from_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Self>> {
        store.fetch_point_window(track_id, from_id, limit)
    }

    fn row_id(&self) -> i64 {
        self.id.map_or(i64::MIN, |id| id.0)
    }
}

impl SequenceItem for Marker {
    const KIND: &'static str = "markers";

    fn fetch_window(
        store: &TrackStore,
        track_id: TrackId,
        from_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Self>> {
        store.fetch_marker_window(track_id, from_id, limit)
    }

    fn row_id(&self) -> i64 {
        self.id.map_or(i64::MIN, |id| id.0)
    }
}

/// Sequence of a track's points.
pub type TrackPointSequence<'a> = Sequence<'a, TrackPoint>;

/// Sequence of a track's markers.
pub type MarkerSequence<'a> = Sequence<'a, Marker>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Another window may follow the buffered one.
    Open,
    /// The last window came back short; only buffered rows remain.
    LastWindow,
    /// Exhausted or failed. Yields nothing more.
    Finished,
}

/// Lazy, forward-only, non-restartable sequence of rows of one track.
///
/// Yields `Err` at most once, after which the sequence is finished.
pub struct Sequence<'a, T: SequenceItem> {
    store: &'a TrackStore,
    track_id: TrackId,
    window_rows: usize,
    window: VecDeque<T>,
    /// First id of the next query (inclusive)
    next_from: Option<i64>,
    /// Id of the last row handed out
    last_id: Option<i64>,
    /// Rows still allowed by the caller's limit
    remaining: Option<usize>,
    cursor: Cursor,
    windows_fetched: usize,
}

impl<'a, T: SequenceItem> Sequence<'a, T> {
    pub(crate) fn new(
        store: &'a TrackStore,
        track_id: TrackId,
        start_id: Option<i64>,
        max_count: Option<usize>,
    ) -> Self {
        let cursor = if max_count == Some(0) {
            Cursor::Finished
        } else {
            Cursor::Open
        };
        Self {
            store,
            track_id,
            window_rows: store.config().effective_window(),
            window: VecDeque::new(),
            next_from: start_id,
            last_id: None,
            remaining: max_count,
            cursor,
            windows_fetched: 0,
        }
    }

    /// Number of queries issued so far.
    pub fn windows_fetched(&self) -> usize {
        self.windows_fetched
    }

    pub fn is_finished(&self) -> bool {
        self.cursor == Cursor::Finished
    }

    /// Sequences are read-only.
    pub fn remove(&mut self) -> Result<()> {
        Err(StoreError::Unsupported("remove"))
    }

    fn fetch_next_window(&mut self) -> Result<()> {
        if self.windows_fetched > 0 {
            debug!(
                "trackstore: [Sequence] Continuing {} of track {} from id {:?}",
                T::KIND,
                self.track_id,
                self.next_from
            );
        }

        let rows = T::fetch_window(self.store, self.track_id, self.next_from, self.window_rows)?;
        self.windows_fetched += 1;
        let fetched = rows.len();
        self.window = rows.into();

        // The continuation query starts at the last returned id.
        if self.last_id.is_some()
            && self.window.front().map(T::row_id) == self.last_id
        {
            self.window.pop_front();
        }

        if fetched < self.window_rows {
            self.cursor = Cursor::LastWindow;
        }
        if let Some(back) = self.window.back() {
            self.next_from = Some(back.row_id());
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.cursor = Cursor::Finished;
        self.window.clear();
    }
}

impl<T: SequenceItem> Iterator for Sequence<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursor == Cursor::Finished {
                return None;
            }

            if let Some(row) = self.window.pop_front() {
                self.last_id = Some(row.row_id());
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                    if *remaining == 0 {
                        self.finish();
                    }
                }
                return Some(Ok(row));
            }

            if self.cursor == Cursor::LastWindow {
                self.finish();
                return None;
            }

            if let Err(e) = self.fetch_next_window() {
                self.finish();
                return Some(Err(e));
            }
        }
    }
}

impl<T: SequenceItem> std::iter::FusedIterator for Sequence<'_, T> {}

impl<T: SequenceItem> Drop for Sequence<'_, T> {
    fn drop(&mut self) {
        trace!(
            "trackstore: [Sequence] Released {} of track {} after {} windows",
            T::KIND,
            self.track_id,
            self.windows_fetched
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpsPoint, StoreConfig, Track, TrackPointId, TrackPointType};
    use chrono::{TimeZone, Utc};

    fn store_with_points(window: usize, count: i64) -> (TrackStore, TrackId, Vec<TrackPointId>) {
        let config = StoreConfig::default().with_result_window(window);
        let store = TrackStore::in_memory_with_config(config).unwrap();
        let track_id = store.insert_track(&Track::new("long")).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, 0).unwrap();
        let points: Vec<_> = (0..count)
            .map(|i| {
                TrackPoint::at(TrackPointType::TrackPoint, start + chrono::Duration::seconds(i))
                    .with_location(GpsPoint::new(50.0 + i as f64 * 1e-5, 4.0))
            })
            .collect();
        let ids = store.bulk_insert_points(&points, track_id).unwrap();
        (store, track_id, ids)
    }

    fn collect_ids(sequence: TrackPointSequence<'_>) -> Vec<TrackPointId> {
        sequence.map(|p| p.unwrap().id.unwrap()).collect()
    }

    #[test]
    fn test_small_window_matches_all_rows() {
        for window in [2, 3, 7, 25, 1024] {
            let (store, track_id, ids) = store_with_points(window, 25);
            let sequence = store.get_point_sequence(track_id, None);
            assert_eq!(collect_ids(sequence), ids, "window {}", window);
        }
    }

    #[test]
    fn test_continuation_queries_are_issued() {
        let (store, track_id, _) = store_with_points(4, 10);
        let mut sequence = store.get_point_sequence(track_id, None);
        let mut seen = 0;
        while let Some(point) = sequence.next() {
            point.unwrap();
            seen += 1;
        }
        assert_eq!(seen, 10);
        // 4 + 3 + 3 rows, then a final query that only returns the repeated row.
        assert_eq!(sequence.windows_fetched(), 4);
        assert!(sequence.is_finished());
        assert!(sequence.next().is_none());
    }

    #[test]
    fn test_start_id_is_inclusive() {
        let (store, track_id, ids) = store_with_points(3, 8);
        let sequence = store.get_point_sequence(track_id, Some(ids[5]));
        assert_eq!(collect_ids(sequence), ids[5..].to_vec());
    }

    #[test]
    fn test_remove_is_unsupported() {
        let (store, track_id, _) = store_with_points(8, 2);
        let mut sequence = store.get_point_sequence(track_id, None);
        sequence.next();
        assert!(matches!(sequence.remove(), Err(StoreError::Unsupported("remove"))));
    }

    #[test]
    fn test_early_break_releases_store() {
        let (store, track_id, ids) = store_with_points(2, 6);
        for point in store.get_point_sequence(track_id, None) {
            if point.unwrap().id == Some(ids[2]) {
                break;
            }
        }
        // The store stays usable for writes after an abandoned sequence.
        assert!(store.delete_track(track_id).is_ok());
    }

    #[test]
    fn test_writes_between_windows_are_seen() {
        let (store, track_id, _) = store_with_points(2, 4);
        let mut sequence = store.get_point_sequence(track_id, None);
        sequence.next().unwrap().unwrap();

        let later = Utc.with_ymd_and_hms(2024, 2, 2, 11, 0, 0).unwrap();
        let extra = TrackPoint::at(TrackPointType::TrackPoint, later)
            .with_location(GpsPoint::new(50.1, 4.0));
        store.insert_point(&extra, track_id).unwrap();

        assert_eq!(sequence.count(), 4);
    }

    #[test]
    fn test_unknown_track_is_empty() {
        let (store, _, _) = store_with_points(4, 3);
        let mut sequence = store.get_point_sequence(TrackId(999), None);
        assert!(sequence.next().is_none());
    }
}
