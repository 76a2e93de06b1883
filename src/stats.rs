//! Track and sensor statistics.
//!
//! [`TrackStatistics`] is stored denormalized on the track row. It is derived
//! from the track's points by [`TrackStatisticsUpdater`], which consumes points
//! in id order (one pass, constant memory) so it can sit directly on top of a
//! streaming point sequence.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::{GpsPoint, TrackPoint, TrackPointType};

/// Below this speed (m/s) an interval does not count as moving time.
pub const MAX_NO_MOVEMENT_SPEED: f64 = 0.224;

/// Aggregate summary of a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStatistics {
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    /// Wall-clock time between start and stop
    pub total_time: Duration,
    /// Time spent above [`MAX_NO_MOVEMENT_SPEED`]
    pub moving_time: Duration,
    /// Distance in meters
    pub total_distance: f64,
    /// Maximum speed in m/s
    pub max_speed: f64,
    /// Altitude range in meters
    pub min_altitude: Option<f64>,
    pub max_altitude: Option<f64>,
    /// Cumulative altitude gain/loss in meters
    pub total_altitude_gain: Option<f64>,
    pub total_altitude_loss: Option<f64>,
}

impl TrackStatistics {
    /// Average speed over the total time, in m/s.
    pub fn average_speed(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs > 0.0 {
            self.total_distance / secs
        } else {
            0.0
        }
    }

    /// Average speed over the moving time, in m/s.
    pub fn average_moving_speed(&self) -> f64 {
        let secs = self.moving_time.as_secs_f64();
        if secs > 0.0 {
            self.total_distance / secs
        } else {
            0.0
        }
    }

    /// `stop_time >= start_time` whenever both are set.
    pub fn has_consistent_times(&self) -> bool {
        match (self.start_time, self.stop_time) {
            (Some(start), Some(stop)) => stop >= start,
            _ => true,
        }
    }
}

/// Min/max/average of one sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Sensor aggregates for a track. A channel that was never recorded is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStatistics {
    /// Heart rate in bpm
    pub heart_rate: Option<ChannelStatistics>,
    /// Cycling cadence in rpm
    pub cadence: Option<ChannelStatistics>,
    /// Power in watts
    pub power: Option<ChannelStatistics>,
}

impl SensorStatistics {
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none() && self.cadence.is_none() && self.power.is_none()
    }
}

/// Incrementally computes [`TrackStatistics`] from points in track order.
#[derive(Debug, Default)]
pub struct TrackStatisticsUpdater {
    stats: TrackStatistics,
    /// Last located point of the current segment
    last_location: Option<(GpsPoint, DateTime<Utc>)>,
    last_altitude: Option<f64>,
    point_count: usize,
}

impl TrackStatisticsUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics of all points added so far.
    pub fn statistics(&self) -> &TrackStatistics {
        &self.stats
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn into_statistics(self) -> TrackStatistics {
        self.stats
    }

    /// Add the next point of the track.
    pub fn add_point(&mut self, point: &TrackPoint) {
        self.point_count += 1;

        let start = *self.stats.start_time.get_or_insert(point.time);
        if self.stats.stop_time.is_none_or(|stop| point.time >= stop) {
            self.stats.stop_time = Some(point.time);
        }
        if let Some(stop) = self.stats.stop_time {
            self.stats.total_time = (stop - start).to_std().unwrap_or_default();
        }

        // No distance or movement is accumulated across a segment boundary.
        if point.point_type.is_segment_start() {
            self.last_location = None;
            self.last_altitude = None;
        }

        self.add_altitude(point);

        if let Some(speed) = point.speed {
            self.stats.max_speed = self.stats.max_speed.max(speed as f64);
        }

        if let Some(location) = point.location {
            if let Some((previous, previous_time)) = self.last_location {
                let distance = haversine_distance(&previous, &location);
                self.stats.total_distance += distance;

                if let Ok(interval) = (point.time - previous_time).to_std() {
                    let secs = interval.as_secs_f64();
                    if secs > 0.0 {
                        let speed = distance / secs;
                        if speed >= MAX_NO_MOVEMENT_SPEED {
                            self.stats.moving_time += interval;
                        }
                        if point.speed.is_none() {
                            self.stats.max_speed = self.stats.max_speed.max(speed);
                        }
                    }
                }
            }
            self.last_location = Some((location, point.time));
        }

        if point.point_type == TrackPointType::SegmentEndManual {
            self.last_location = None;
            self.last_altitude = None;
        }
    }

    fn add_altitude(&mut self, point: &TrackPoint) {
        if let Some(altitude) = point.altitude {
            self.stats.min_altitude = Some(self.stats.min_altitude.map_or(altitude, |m| m.min(altitude)));
            self.stats.max_altitude = Some(self.stats.max_altitude.map_or(altitude, |m| m.max(altitude)));
        }

        // Sensor-reported deltas take precedence over altitude differences.
        if point.altitude_gain.is_some() || point.altitude_loss.is_some() {
            if let Some(gain) = point.altitude_gain {
                *self.stats.total_altitude_gain.get_or_insert(0.0) += gain as f64;
            }
            if let Some(loss) = point.altitude_loss {
                *self.stats.total_altitude_loss.get_or_insert(0.0) += loss as f64;
            }
        } else if let (Some(previous), Some(altitude)) = (self.last_altitude, point.altitude) {
            let delta = altitude - previous;
            let gain = self.stats.total_altitude_gain.get_or_insert(0.0);
            if delta > 0.0 {
                *gain += delta;
            }
            let loss = self.stats.total_altitude_loss.get_or_insert(0.0);
            if delta < 0.0 {
                *loss -= delta;
            }
        }

        if point.altitude.is_some() {
            self.last_altitude = point.altitude;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn located(point_type: TrackPointType, secs: i64, lat: f64) -> TrackPoint {
        TrackPoint::at(point_type, t(secs)).with_location(GpsPoint::new(lat, 7.0))
    }

    #[test]
    fn test_times_and_distance() {
        let mut updater = TrackStatisticsUpdater::new();
        updater.add_point(&located(TrackPointType::SegmentStartAutomatic, 0, 46.0));
        updater.add_point(&located(TrackPointType::TrackPoint, 10, 46.001));
        updater.add_point(&located(TrackPointType::TrackPoint, 20, 46.002));

        let stats = updater.statistics();
        assert_eq!(stats.start_time, Some(t(0)));
        assert_eq!(stats.stop_time, Some(t(20)));
        assert_eq!(stats.total_time, Duration::from_secs(20));
        assert_eq!(stats.moving_time, Duration::from_secs(20));
        assert!((stats.total_distance - 222.4).abs() < 1.0, "{}", stats.total_distance);
        assert!(stats.max_speed > 11.0 && stats.max_speed < 11.2);
        assert!(stats.has_consistent_times());
    }

    #[test]
    fn test_no_distance_across_segment_gap() {
        let mut updater = TrackStatisticsUpdater::new();
        updater.add_point(&located(TrackPointType::SegmentStartAutomatic, 0, 46.0));
        updater.add_point(&located(TrackPointType::TrackPoint, 10, 46.001));
        updater.add_point(&TrackPoint::at(TrackPointType::SegmentStartManual, t(100)));
        updater.add_point(&located(TrackPointType::TrackPoint, 110, 47.0));

        let stats = updater.statistics();
        assert!(stats.total_distance < 112.0, "{}", stats.total_distance);
        assert_eq!(stats.moving_time, Duration::from_secs(10));
        assert_eq!(stats.total_time, Duration::from_secs(110));
    }

    #[test]
    fn test_stationary_interval_is_not_moving() {
        let mut updater = TrackStatisticsUpdater::new();
        updater.add_point(&located(TrackPointType::SegmentStartAutomatic, 0, 46.0));
        updater.add_point(&located(TrackPointType::TrackPoint, 60, 46.0));
        assert_eq!(updater.statistics().moving_time, Duration::ZERO);
    }

    #[test]
    fn test_altitude_from_deltas_and_sensor() {
        let mut updater = TrackStatisticsUpdater::new();
        updater.add_point(&located(TrackPointType::SegmentStartAutomatic, 0, 46.0).with_altitude(100.0));
        updater.add_point(&located(TrackPointType::TrackPoint, 10, 46.0).with_altitude(110.0));
        updater.add_point(&located(TrackPointType::TrackPoint, 20, 46.0).with_altitude(104.0));
        let mut sensed = located(TrackPointType::TrackPoint, 30, 46.0).with_altitude(104.0);
        sensed.altitude_gain = Some(2.5);
        updater.add_point(&sensed);

        let stats = updater.statistics();
        assert_eq!(stats.min_altitude, Some(100.0));
        assert_eq!(stats.max_altitude, Some(110.0));
        assert_eq!(stats.total_altitude_gain, Some(12.5));
        assert_eq!(stats.total_altitude_loss, Some(6.0));
    }

    #[test]
    fn test_average_speeds_handle_zero_time() {
        let stats = TrackStatistics::default();
        assert_eq!(stats.average_speed(), 0.0);
        assert_eq!(stats.average_moving_speed(), 0.0);
    }
}
