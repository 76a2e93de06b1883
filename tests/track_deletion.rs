//! Cascading deletes and photo asset cleanup.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use trackstore::{
    DataChange, DataKinds, FsPhotoStore, GpsPoint, Marker, PhotoStore, StoreConfig, Track,
    TrackDataObserver, TrackId, TrackPoint, TrackPointType, TrackStore,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Fixture {
    _tmp: TempDir,
    photos: Arc<FsPhotoStore>,
    store: TrackStore,
}

fn fixture(config: StoreConfig) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let photos = Arc::new(FsPhotoStore::new(tmp.path().join("photos")));
    let store = TrackStore::open_with_config(tmp.path().join("tracks.db"), config)
        .unwrap()
        .with_photo_store(photos.clone());
    Fixture {
        _tmp: tmp,
        photos,
        store,
    }
}

fn write_photo(photos: &FsPhotoStore, track_id: TrackId, name: &str) -> PathBuf {
    let dir = photos.track_dir(track_id);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, b"\xff\xd8\xff").unwrap();
    path
}

/// Track with 10 points and two markers, one of them with a photo.
fn populate(fx: &Fixture, name: &str) -> TrackId {
    let track_id = fx.store.insert_track(&Track::new(name)).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 10, 1, 14, 0, 0).unwrap();
    let points: Vec<_> = (0..10)
        .map(|i| {
            let point_type = if i == 0 {
                TrackPointType::SegmentStartAutomatic
            } else {
                TrackPointType::TrackPoint
            };
            TrackPoint::at(point_type, start + chrono::Duration::seconds(i))
                .with_location(GpsPoint::new(47.37 + i as f64 * 1e-4, 8.54))
        })
        .collect();
    fx.store.bulk_insert_points(&points, track_id).unwrap();

    let photo = write_photo(&fx.photos, track_id, "lake.jpg");
    let mut with_photo = Marker::new(track_id, start, GpsPoint::new(47.37, 8.54));
    with_photo.photo_url = Some(format!("content://photos/{}/{}", track_id, "lake.jpg"));
    fx.store.insert_marker(&with_photo).unwrap();
    assert!(photo.is_file());

    let plain = Marker::new(track_id, start, GpsPoint::new(47.371, 8.54));
    fx.store.insert_marker(&plain).unwrap();
    track_id
}

#[test]
fn test_delete_track_cascades_to_points_markers_and_photos() {
    init_logging();
    let fx = fixture(StoreConfig::default());
    let doomed = populate(&fx, "doomed");
    let kept = populate(&fx, "kept");

    fx.store.delete_track(doomed).unwrap();

    assert!(fx.store.get_track(doomed).unwrap().is_none());
    assert_eq!(fx.store.get_point_count(doomed).unwrap(), 0);
    assert_eq!(fx.store.get_marker_count(doomed).unwrap(), 0);
    assert!(!fx.photos.exists(doomed, "lake.jpg"));
    assert!(!fx.photos.track_dir(doomed).exists());

    assert_eq!(fx.store.get_point_count(kept).unwrap(), 10);
    assert_eq!(fx.store.get_marker_count(kept).unwrap(), 2);
    assert!(fx.photos.exists(kept, "lake.jpg"));
}

#[test]
fn test_delete_several_tracks_without_vacuum() {
    init_logging();
    let fx = fixture(StoreConfig {
        vacuum_on_delete: false,
        ..StoreConfig::default()
    });
    let a = populate(&fx, "a");
    let b = populate(&fx, "b");
    let c = populate(&fx, "c");

    fx.store.delete_tracks(&[a, c]).unwrap();
    let remaining: Vec<_> = fx
        .store
        .get_tracks()
        .unwrap()
        .into_iter()
        .map(|t| t.id.unwrap())
        .collect();
    assert_eq!(remaining, vec![b]);
    assert!(!fx.photos.track_dir(a).exists());
    assert!(!fx.photos.track_dir(c).exists());
}

#[test]
fn test_delete_marker_removes_photo_and_empty_directory() {
    init_logging();
    let fx = fixture(StoreConfig::default());
    let track_id = populate(&fx, "markers");
    let markers = fx.store.get_markers(track_id).unwrap();
    let photo_marker = markers.iter().find(|m| m.has_photo()).unwrap();

    assert!(fx.store.delete_marker(photo_marker.id.unwrap()).unwrap());
    assert!(!fx.photos.exists(track_id, "lake.jpg"));
    assert!(!fx.photos.track_dir(track_id).exists());
    assert_eq!(fx.store.get_marker_count(track_id).unwrap(), 1);
    assert_eq!(fx.store.get_point_count(track_id).unwrap(), 10);
}

#[test]
fn test_delete_all_tracks_clears_photo_root() {
    init_logging();
    let fx = fixture(StoreConfig::default());
    populate(&fx, "one");
    populate(&fx, "two");

    fx.store.delete_all_tracks().unwrap();
    assert!(fx.store.get_tracks().unwrap().is_empty());
    assert!(!fx.photos.root().exists());
}

#[derive(Default)]
struct Deletions {
    tracks: Mutex<Vec<TrackId>>,
}

impl TrackDataObserver for Deletions {
    fn on_data_changed(&self, change: &DataChange) {
        if let DataChange::TracksDeleted(ids) = change {
            self.tracks.lock().unwrap().extend(ids);
        }
    }
}

#[test]
fn test_committed_delete_succeeds_when_photo_cleanup_fails() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    // A plain file where the photo directory should be.
    let photo_root = tmp.path().join("photos");
    fs::write(&photo_root, b"not a directory").unwrap();
    let store = TrackStore::open(tmp.path().join("tracks.db"))
        .unwrap()
        .with_photo_store(Arc::new(FsPhotoStore::new(&photo_root)));
    let deletions = Arc::new(Deletions::default());
    store.register_observer(&deletions, DataKinds::TRACKS);

    let start = Utc.with_ymd_and_hms(2024, 10, 2, 9, 0, 0).unwrap();
    let first = store.insert_track(&Track::new("first")).unwrap();
    let mut marker = Marker::new(first, start, GpsPoint::new(47.37, 8.54));
    marker.photo_url = Some(format!("content://photos/{}/{}", first, "view.jpg"));
    store.insert_marker(&marker).unwrap();
    let second = store.insert_track(&Track::new("second")).unwrap();

    store.delete_track(first).unwrap();
    assert!(store.get_track(first).unwrap().is_none());
    assert_eq!(store.get_marker_count(first).unwrap(), 0);

    store.delete_all_tracks().unwrap();
    assert!(store.get_tracks().unwrap().is_empty());
    assert!(photo_root.is_file());

    assert_eq!(*deletions.tracks.lock().unwrap(), vec![first, second]);
}
