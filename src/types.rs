//! Entity model: tracks, track points and markers.
//!
//! These are plain data containers. The store assigns ids on insert; an
//! entity that was never persisted carries `id: None`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stats::TrackStatistics;

// ============================================================================
// Identifiers
// ============================================================================

/// Store-assigned track id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub i64);

/// Store-assigned marker id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkerId(pub i64);

/// Store-assigned track point id. Ids grow monotonically within a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackPointId(pub i64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Location
// ============================================================================

/// A GPS coordinate with latitude and longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

// ============================================================================
// Track
// ============================================================================

/// A recorded activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: Option<TrackId>,
    /// Client-generated id, stable across stores
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    /// Activity type label (e.g. "cycling")
    pub category: String,
    pub icon: String,
    pub statistics: TrackStatistics,
}

impl Track {
    /// Create an unsaved track with a fresh UUID.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for Track {
    fn default() -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            name: String::new(),
            description: String::new(),
            category: String::new(),
            icon: String::new(),
            statistics: TrackStatistics::default(),
        }
    }
}

// ============================================================================
// Track Point
// ============================================================================

/// Role of a point inside its segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackPointType {
    /// Segment start after an intentional pause; carries no location.
    SegmentStartManual,
    /// Segment start after an unplanned gap.
    SegmentStartAutomatic,
    TrackPoint,
    SegmentEndManual,
}

impl TrackPointType {
    /// Code stored in the `type` column.
    pub fn db_code(self) -> i64 {
        match self {
            TrackPointType::SegmentStartManual => -2,
            TrackPointType::SegmentStartAutomatic => -1,
            TrackPointType::TrackPoint => 0,
            TrackPointType::SegmentEndManual => 1,
        }
    }

    pub fn from_db_code(code: i64) -> Option<Self> {
        match code {
            -2 => Some(TrackPointType::SegmentStartManual),
            -1 => Some(TrackPointType::SegmentStartAutomatic),
            0 => Some(TrackPointType::TrackPoint),
            1 => Some(TrackPointType::SegmentEndManual),
            _ => None,
        }
    }

    pub fn is_segment_start(self) -> bool {
        matches!(
            self,
            TrackPointType::SegmentStartManual | TrackPointType::SegmentStartAutomatic
        )
    }

    /// Segment boundaries may be stored without a location.
    pub fn allows_missing_location(self) -> bool {
        self != TrackPointType::TrackPoint
    }
}

/// A single sample of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub id: Option<TrackPointId>,
    pub point_type: TrackPointType,
    pub time: DateTime<Utc>,
    pub location: Option<GpsPoint>,
    /// Altitude in meters
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters
    pub accuracy: Option<f32>,
    /// Bearing in degrees
    pub bearing: Option<f32>,
    /// Speed in m/s
    pub speed: Option<f32>,
    /// Heart rate in bpm
    pub heart_rate: Option<f32>,
    /// Cycling cadence in rpm
    pub cadence: Option<f32>,
    /// Power in watts
    pub power: Option<f32>,
    /// Distance reported by a sensor since the previous point, in meters
    pub sensor_distance: Option<f32>,
    /// Altitude gained since the previous point, in meters
    pub altitude_gain: Option<f32>,
    /// Altitude lost since the previous point, in meters
    pub altitude_loss: Option<f32>,
}

impl TrackPoint {
    /// Create a point of the given type with only a timestamp set.
    pub fn at(point_type: TrackPointType, time: DateTime<Utc>) -> Self {
        Self {
            id: None,
            point_type,
            time,
            location: None,
            altitude: None,
            accuracy: None,
            bearing: None,
            speed: None,
            heart_rate: None,
            cadence: None,
            power: None,
            sensor_distance: None,
            altitude_gain: None,
            altitude_loss: None,
        }
    }

    pub fn with_location(mut self, location: GpsPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn has_location(&self) -> bool {
        self.location.is_some()
    }
}

// ============================================================================
// Marker
// ============================================================================

/// A point of interest attached to a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: Option<MarkerId>,
    pub track_id: TrackId,
    pub time: DateTime<Utc>,
    pub location: GpsPoint,
    pub altitude: Option<f64>,
    pub accuracy: Option<f32>,
    pub bearing: Option<f32>,
    pub name: String,
    pub description: String,
    pub category: String,
    pub icon: String,
    /// Track distance from the start up to this marker, in meters
    pub length: f64,
    /// Track time from the start up to this marker
    pub duration: Duration,
    /// Reference to the photo asset; the last path segment names the file
    pub photo_url: Option<String>,
}

impl Marker {
    /// Create an unsaved marker.
    pub fn new(track_id: TrackId, time: DateTime<Utc>, location: GpsPoint) -> Self {
        Self {
            id: None,
            track_id,
            time,
            location,
            altitude: None,
            accuracy: None,
            bearing: None,
            name: String::new(),
            description: String::new(),
            category: String::new(),
            icon: String::new(),
            length: 0.0,
            duration: Duration::ZERO,
            photo_url: None,
        }
    }

    pub fn has_photo(&self) -> bool {
        self.photo_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}
