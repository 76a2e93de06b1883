//! Point store integration tests: streaming, concurrency and notifications.

use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use trackstore::{
    DataChange, DataKinds, GpsPoint, StoreConfig, Track, TrackDataObserver, TrackId, TrackPoint,
    TrackPointId, TrackPointType, TrackStore,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 3, 5, 30, 0).unwrap() + Duration::seconds(secs)
}

/// A segmented synthetic ride: a manual pause every 50 points.
fn ride(count: usize) -> Vec<TrackPoint> {
    (0..count)
        .map(|i| {
            let point_type = match i {
                0 => TrackPointType::SegmentStartAutomatic,
                i if i % 50 == 0 => TrackPointType::SegmentStartManual,
                _ => TrackPointType::TrackPoint,
            };
            let mut point = TrackPoint::at(point_type, t(i as i64));
            if point_type != TrackPointType::SegmentStartManual {
                point.location = Some(GpsPoint::new(46.0 + i as f64 * 1e-5, 7.0));
                point.speed = Some(4.2);
            }
            point
        })
        .collect()
}

fn store_with_ride(config: StoreConfig, count: usize) -> (TrackStore, TrackId, Vec<TrackPointId>) {
    let store = TrackStore::in_memory_with_config(config).unwrap();
    let track_id = store.insert_track(&Track::new("ride")).unwrap();
    let ids = store.bulk_insert_points(&ride(count), track_id).unwrap();
    (store, track_id, ids)
}

#[test]
fn test_sequence_is_independent_of_window_size() {
    init_logging();
    let (reference, track_id, ids) = store_with_ride(StoreConfig::default(), 257);
    let unbounded: Vec<_> = reference
        .get_point_sequence(track_id, None)
        .map(|p| p.unwrap().id.unwrap())
        .collect();
    assert_eq!(unbounded, ids);

    for window in [0, 1, 2, 3, 16, 50, 256, 257, 258] {
        let config = StoreConfig::default().with_result_window(window);
        let (store, track_id, _) = store_with_ride(config, 257);
        let streamed: Vec<_> = store
            .get_point_sequence(track_id, None)
            .map(|p| p.unwrap().id.unwrap())
            .collect();
        assert_eq!(streamed, unbounded, "window {}", window);
    }
}

#[test]
fn test_sequence_from_middle() {
    let config = StoreConfig::default().with_result_window(8);
    let (store, track_id, ids) = store_with_ride(config, 40);
    let tail: Vec<_> = store
        .get_point_sequence(track_id, Some(ids[17]))
        .map(|p| p.unwrap().id.unwrap())
        .collect();
    assert_eq!(tail, ids[17..].to_vec());
}

#[test]
fn test_sequences_of_different_tracks_are_isolated() {
    let config = StoreConfig::default().with_result_window(4);
    let (store, first, first_ids) = store_with_ride(config, 10);
    let second = store.insert_track(&Track::new("other")).unwrap();
    store.bulk_insert_points(&ride(7), second).unwrap();

    let streamed: Vec<_> = store
        .get_point_sequence(first, None)
        .map(|p| p.unwrap().id.unwrap())
        .collect();
    assert_eq!(streamed, first_ids);
    assert_eq!(store.get_point_sequence(second, None).count(), 7);
}

#[test]
fn test_recompute_statistics_from_points() {
    init_logging();
    let (store, track_id, _) = store_with_ride(StoreConfig::default(), 120);
    let stats = store.recompute_track_statistics(track_id).unwrap().unwrap();

    assert_eq!(stats.start_time, Some(t(0)));
    assert_eq!(stats.stop_time, Some(t(119)));
    assert!(stats.total_distance > 0.0);
    assert!((stats.max_speed - 4.2).abs() < 1e-6);

    let stored = store.get_track(track_id).unwrap().unwrap();
    assert_eq!(stored.statistics, stats);
}

#[test]
fn test_reader_and_writer_threads_share_store() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let config = StoreConfig::default().with_result_window(16);
    let store = Arc::new(TrackStore::open_with_config(tmp.path().join("tracks.db"), config).unwrap());
    let track_id = store.insert_track(&Track::new("live")).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for batch in 0..20 {
                let points: Vec<_> = (0..10)
                    .map(|i| {
                        let n = batch * 10 + i;
                        TrackPoint::at(TrackPointType::TrackPoint, t(n))
                            .with_location(GpsPoint::new(46.0 + n as f64 * 1e-5, 7.0))
                    })
                    .collect();
                store.bulk_insert_points(&points, track_id).unwrap();
            }
        })
    };

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..20 {
                let ids: Vec<_> = store
                    .get_point_sequence(track_id, None)
                    .map(|p| p.unwrap().id.unwrap())
                    .collect();
                // Whole batches only, in strictly increasing id order.
                assert_eq!(ids.len() % 10, 0);
                assert!(ids.windows(2).all(|w| w[0] < w[1]));
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(store.get_point_count(track_id).unwrap(), 200);
}

#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<DataChange>>,
}

impl TrackDataObserver for Recorder {
    fn on_data_changed(&self, change: &DataChange) {
        self.changes.lock().unwrap().push(change.clone());
    }
}

/// Reads the store from inside its callback.
struct Reentrant {
    store: Arc<TrackStore>,
    seen_points: Mutex<Vec<usize>>,
}

impl TrackDataObserver for Reentrant {
    fn on_data_changed(&self, change: &DataChange) {
        if let DataChange::PointsInserted { track_id, .. } = change {
            let count = self.store.get_point_count(*track_id).unwrap();
            self.seen_points.lock().unwrap().push(count);
        }
    }
}

#[test]
fn test_observers_see_committed_writes() {
    init_logging();
    let store = Arc::new(TrackStore::in_memory().unwrap());
    let tracks = Arc::new(Recorder::default());
    let reentrant = Arc::new(Reentrant {
        store: Arc::clone(&store),
        seen_points: Mutex::new(Vec::new()),
    });
    store.register_observer(&tracks, DataKinds::TRACKS);
    store.register_observer(&reentrant, DataKinds::POINTS);

    let track_id = store.insert_track(&Track::new("observed")).unwrap();
    store.bulk_insert_points(&ride(5), track_id).unwrap();
    store.delete_track(track_id).unwrap();

    assert_eq!(
        *tracks.changes.lock().unwrap(),
        vec![
            DataChange::TrackInserted(track_id),
            DataChange::TracksDeleted(vec![track_id]),
        ]
    );
    assert_eq!(*reentrant.seen_points.lock().unwrap(), vec![5]);

    assert!(store.unregister_observer(&tracks));
    store.insert_track(&Track::new("unobserved")).unwrap();
    assert_eq!(tracks.changes.lock().unwrap().len(), 2);
}
