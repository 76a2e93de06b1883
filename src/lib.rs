//! # Track Store
//!
//! Storage, streaming and import of recorded GPS activity tracks.
//!
//! This library provides:
//! - A SQLite-backed store for tracks, markers and track points
//! - Forward-only point sequences that page through bounded result windows
//! - An event-driven KML importer that rebuilds tracks, segments, sensor
//!   channels and markers from a stream of parse events
//!
//! ## Quick Start
//!
//! ```rust
//! use trackstore::{GpsPoint, Track, TrackPoint, TrackPointType, TrackStore};
//! use chrono::{TimeZone, Utc};
//!
//! let store = TrackStore::in_memory().unwrap();
//! let track_id = store.insert_track(&Track::new("Morning ride")).unwrap();
//!
//! let start = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
//! let points = vec![
//!     TrackPoint::at(TrackPointType::SegmentStartAutomatic, start)
//!         .with_location(GpsPoint::new(46.5197, 6.6323)),
//!     TrackPoint::at(TrackPointType::TrackPoint, start + chrono::Duration::seconds(5))
//!         .with_location(GpsPoint::new(46.5199, 6.6327)),
//! ];
//! store.bulk_insert_points(&points, track_id).unwrap();
//!
//! let ids: Vec<_> = store
//!     .get_point_sequence(track_id, None)
//!     .map(|p| p.unwrap().id)
//!     .collect();
//! assert_eq!(ids.len(), 2);
//! ```

// Unified error handling
pub mod error;
pub use error::{FilePosition, ImportError, Result, StoreError};

// Store and import configuration
pub mod config;
pub use config::{FailurePolicy, ImportConfig, StoreConfig};

// Entity model
pub mod types;
pub use types::{GpsPoint, Marker, MarkerId, Track, TrackId, TrackPoint, TrackPointId, TrackPointType};

// Track and sensor statistics
pub mod stats;
pub use stats::{ChannelStatistics, SensorStatistics, TrackStatistics, TrackStatisticsUpdater};

// Geographic utilities (distance, fixed-point coordinates)
pub mod geo_utils;

// Schema migrations
pub mod migrations;

// Change notification
pub mod observer;
pub use observer::{DataChange, DataKinds, TrackDataObserver};

// Marker photo assets
pub mod photos;
pub use photos::{FsPhotoStore, PhotoStore};

// SQLite-backed track store
pub mod persistence;
pub use persistence::{MarkerSequence, TrackPointSequence, TrackStore};

// KML track import
pub mod import;
pub use import::{ImportState, ImportSummary, KmlTrackImporter, ParseEvent, SensorChannel};
