//! Sensor channels of a segment (`gx:SimpleArrayData`).
//!
//! Each channel is a list of values aligned with the segment's points by
//! position. Blank values are kept as `None` so they still take a position.

use std::collections::HashMap;

use crate::TrackPoint;

/// A known extended-data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorChannel {
    /// Speed in m/s
    Speed,
    /// Sensor distance in meters
    Distance,
    /// Heart rate in bpm
    HeartRate,
    /// Cadence in rpm
    Cadence,
    /// Power in watts
    Power,
    /// Altitude gain in meters
    ElevationGain,
    /// Altitude loss in meters
    ElevationLoss,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; 7] = [
        SensorChannel::Speed,
        SensorChannel::Distance,
        SensorChannel::HeartRate,
        SensorChannel::Cadence,
        SensorChannel::Power,
        SensorChannel::ElevationGain,
        SensorChannel::ElevationLoss,
    ];

    /// Channel for a `gx:SimpleArrayData` name attribute.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            SensorChannel::Speed => "speed",
            SensorChannel::Distance => "distance",
            SensorChannel::HeartRate => "heart_rate",
            SensorChannel::Cadence => "cadence",
            SensorChannel::Power => "power",
            SensorChannel::ElevationGain => "elevation_gain",
            SensorChannel::ElevationLoss => "elevation_loss",
        }
    }

    fn apply(self, point: &mut TrackPoint, value: f32) {
        let field = match self {
            SensorChannel::Speed => &mut point.speed,
            SensorChannel::Distance => &mut point.sensor_distance,
            SensorChannel::HeartRate => &mut point.heart_rate,
            SensorChannel::Cadence => &mut point.cadence,
            SensorChannel::Power => &mut point.power,
            SensorChannel::ElevationGain => &mut point.altitude_gain,
            SensorChannel::ElevationLoss => &mut point.altitude_loss,
        };
        *field = Some(value);
    }
}

/// Per-segment channel values.
#[derive(Debug, Default)]
pub(crate) struct ChannelBuffers {
    values: HashMap<SensorChannel, Vec<Option<f32>>>,
}

impl ChannelBuffers {
    pub fn push(&mut self, channel: SensorChannel, value: Option<f32>) {
        self.values.entry(channel).or_default().push(value);
    }

    #[cfg(test)]
    pub fn len(&self, channel: SensorChannel) -> usize {
        self.values.get(&channel).map_or(0, Vec::len)
    }

    /// Copy value `i` of every channel onto point `i`.
    ///
    /// A channel shorter than the point list leaves the trailing points
    /// untouched; a `None` entry leaves its point untouched.
    pub fn merge_into(&self, points: &mut [TrackPoint]) {
        for (&channel, values) in &self.values {
            for (point, value) in points.iter_mut().zip(values) {
                if let Some(value) = *value {
                    channel.apply(point, value);
                }
            }
        }
    }
}
