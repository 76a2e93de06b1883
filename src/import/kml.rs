//! KML track importer.
//!
//! Expected structure (element names as reported by the parser):
//!
//! ```text
//! kml
//! ├── Placemark (styleUrl = #waypoint)        marker
//! │   ├── name, description, icon, value, styleUrl
//! │   ├── TimeStamp/when
//! │   ├── Point/coordinates                   "lon,lat[,alt]"
//! │   └── href (PhotoOverlay only)
//! └── Placemark                               track wrapper
//!     ├── name, description, icon, value, opentracks:trackid
//!     └── gx:MultiTrack                       track
//!         └── gx:Track                        segment
//!             ├── when ...                    one per point
//!             ├── gx:coord ...                "lon lat [alt]", empty = no location
//!             └── gx:SimpleArrayData name=…   sensor channel
//!                 └── gx:value ...            one per point, blank = none
//! ```
//!
//! Track fields and marker fields live in separate storage. Text goes to the
//! innermost open construct: a Placemark nested inside `gx:MultiTrack` fills the
//! marker fields and leaves the track's untouched.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use super::channels::{ChannelBuffers, SensorChannel};
use super::{ImportSummary, ParseEvent};
use crate::config::{FailurePolicy, ImportConfig};
use crate::error::{FilePosition, ImportError, OptionExt};
use crate::stats::{TrackStatistics, TrackStatisticsUpdater};
use crate::{GpsPoint, Marker, Track, TrackId, TrackPoint, TrackPointType, TrackStore};

/// Style reference that marks a Placemark as a marker.
pub const MARKER_STYLE: &str = "#waypoint";

const TAG_COORDINATES: &str = "coordinates";
const TAG_DESCRIPTION: &str = "description";
const TAG_GX_COORD: &str = "gx:coord";
const TAG_GX_MULTI_TRACK: &str = "gx:MultiTrack";
const TAG_GX_SIMPLE_ARRAY_DATA: &str = "gx:SimpleArrayData";
const TAG_GX_TRACK: &str = "gx:Track";
const TAG_GX_VALUE: &str = "gx:value";
const TAG_HREF: &str = "href";
const TAG_ICON: &str = "icon";
const TAG_KML: &str = "kml";
const TAG_NAME: &str = "name";
const TAG_PHOTO_OVERLAY: &str = "PhotoOverlay";
const TAG_PLACEMARK: &str = "Placemark";
const TAG_STYLE_URL: &str = "styleUrl";
const TAG_UUID: &str = "opentracks:trackid";
const TAG_VALUE: &str = "value";
const TAG_WHEN: &str = "when";

const ATTRIBUTE_NAME: &str = "name";

/// Innermost construct the importer is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    InFile,
    InTrack,
    InSegment,
    InMarkerCandidate,
    InExtendedDataChannel,
}

/// Scratch fields of a Placemark. Reset when a Placemark opens.
#[derive(Debug, Default)]
struct MarkerFields {
    name: Option<String>,
    description: Option<String>,
    category: Option<String>,
    icon: Option<String>,
    uuid: Option<Uuid>,
    photo_url: Option<String>,
    location: Option<GpsPoint>,
    altitude: Option<f64>,
    time: Option<DateTime<Utc>>,
    style: Option<String>,
}

impl MarkerFields {
    fn is_complete(&self) -> bool {
        self.location.is_some() && self.time.is_some()
    }

    fn into_marker(self, track_id: TrackId) -> Option<Marker> {
        let mut marker = Marker::new(track_id, self.time?, self.location?);
        marker.altitude = self.altitude;
        marker.name = self.name.unwrap_or_default();
        marker.description = self.description.unwrap_or_default();
        marker.category = self.category.unwrap_or_default();
        marker.icon = self.icon.unwrap_or_default();
        marker.photo_url = self.photo_url.filter(|url| !url.is_empty());
        Some(marker)
    }
}

/// The track under construction (InTrack).
struct TrackBuilder {
    track: Track,
    /// Set once the track row exists
    id: Option<TrackId>,
    /// Open Placemarks when the track opened; deeper ones are markers inside it
    marker_depth: usize,
}

#[derive(Debug, Clone, Copy)]
enum ChannelSlot {
    Known(SensorChannel),
    /// Values are still validated, then dropped.
    Unsupported,
}

/// Buffers of the open segment (InSegment). Dropped when the segment closes.
#[derive(Default)]
struct SegmentBuffer {
    points: Vec<TrackPoint>,
    /// `when` values not yet consumed by a `gx:coord`
    pending_times: VecDeque<DateTime<Utc>>,
    channels: ChannelBuffers,
    channel: Option<ChannelSlot>,
}

/// Event-driven KML importer.
///
/// Feed events with [`handle`](Self::handle) and finish with
/// [`finish`](Self::finish), or pass a whole stream to [`import`](Self::import).
/// The first error aborts the import; later events return [`ImportError::Aborted`].
///
/// Each segment is committed as it closes. What happens to committed segments
/// on a later failure is decided by [`ImportConfig::failure_policy`].
pub struct KmlTrackImporter<'a> {
    store: &'a TrackStore,
    config: ImportConfig,

    in_file: bool,
    file_closed: bool,
    /// Open Placemark / PhotoOverlay elements
    marker_depth: usize,
    failed: bool,

    /// Text of the element currently open
    content: Option<String>,
    position: Option<FilePosition>,

    scratch: MarkerFields,
    track: Option<TrackBuilder>,
    segment: Option<SegmentBuffer>,

    /// Markers seen before any track was created
    pending_markers: Vec<MarkerFields>,
    latest_track: Option<TrackId>,

    summary: ImportSummary,
}

fn structural(element: &str, context: &str, position: Option<FilePosition>) -> ImportError {
    ImportError::Structural {
        element: element.to_string(),
        context: context.to_string(),
        position,
    }
}

fn value_parse(element: &str, raw: &str, position: Option<FilePosition>) -> ImportError {
    ImportError::ValueParse {
        element: element.to_string(),
        raw: raw.to_string(),
        position,
    }
}

fn missing(element: &str, position: Option<FilePosition>) -> ImportError {
    ImportError::MissingValue {
        element: element.to_string(),
        position,
    }
}

fn parse_time(
    element: &str,
    raw: &str,
    position: Option<FilePosition>,
) -> Result<DateTime<Utc>, ImportError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|_| value_parse(element, raw, position))
}

/// Parse "lon{sep}lat[{sep}alt]". Any other number of parts means "no location".
fn parse_coordinates<'t>(
    element: &str,
    raw: &str,
    parts: impl Iterator<Item = &'t str>,
    position: Option<FilePosition>,
) -> Result<Option<(GpsPoint, Option<f64>)>, ImportError> {
    let parts: Vec<&str> = parts.map(str::trim).collect();
    if parts.len() != 2 && parts.len() != 3 {
        return Ok(None);
    }

    let number = |s: &str| {
        s.parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| value_parse(element, raw, position))
    };
    let location = GpsPoint::new(number(parts[1])?, number(parts[0])?);
    if !location.is_valid() {
        return Err(value_parse(element, raw, position));
    }
    let altitude = parts.get(2).copied().map(number).transpose()?;
    Ok(Some((location, altitude)))
}

/// Distance and time from the track start up to the marker.
fn set_marker_progress(marker: &mut Marker, stats: &TrackStatistics) {
    marker.length = stats.total_distance;
    marker.duration = stats
        .start_time
        .and_then(|start| (marker.time - start).to_std().ok())
        .unwrap_or_default();
}

impl<'a> KmlTrackImporter<'a> {
    pub fn new(store: &'a TrackStore) -> Self {
        Self::with_config(store, ImportConfig::default())
    }

    pub fn with_config(store: &'a TrackStore, config: ImportConfig) -> Self {
        Self {
            store,
            config,
            in_file: false,
            file_closed: false,
            marker_depth: 0,
            failed: false,
            content: None,
            position: None,
            scratch: MarkerFields::default(),
            track: None,
            segment: None,
            pending_markers: Vec::new(),
            latest_track: None,
            summary: ImportSummary::default(),
        }
    }

    /// Record the parser position of the next event, for error messages.
    pub fn set_position(&mut self, position: FilePosition) {
        self.position = Some(position);
    }

    pub fn state(&self) -> ImportState {
        if let Some(segment) = &self.segment {
            if segment.channel.is_some() {
                return ImportState::InExtendedDataChannel;
            }
            return ImportState::InSegment;
        }
        if self.in_nested_marker() {
            ImportState::InMarkerCandidate
        } else if self.track.is_some() {
            ImportState::InTrack
        } else if self.in_file {
            ImportState::InFile
        } else {
            ImportState::Idle
        }
    }

    /// Whether a marker candidate is open inside the innermost track (or outside any track).
    fn in_nested_marker(&self) -> bool {
        let track_depth = self.track.as_ref().map_or(0, |builder| builder.marker_depth);
        self.marker_depth > track_depth
    }

    /// What has been created so far.
    pub fn summary(&self) -> &ImportSummary {
        &self.summary
    }

    /// Import a complete event stream.
    pub fn import<I>(mut self, events: I) -> Result<ImportSummary, ImportError>
    where
        I: IntoIterator<Item = ParseEvent>,
    {
        for event in events {
            self.handle(event)?;
        }
        self.finish()
    }

    /// Process one event.
    pub fn handle(&mut self, event: ParseEvent) -> Result<(), ImportError> {
        if self.failed {
            return Err(ImportError::Aborted);
        }

        let result = match event {
            ParseEvent::StartElement { name, attributes } => self.start_element(&name, &attributes),
            ParseEvent::Text(text) => {
                if let Some(content) = self.content.as_mut() {
                    content.push_str(&text);
                }
                Ok(())
            }
            ParseEvent::EndElement { name } => self.end_element(&name),
        };

        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    /// Complete the import. Fails if the file was never closed.
    pub fn finish(mut self) -> Result<ImportSummary, ImportError> {
        if self.failed {
            return Err(ImportError::Aborted);
        }
        if !self.file_closed || self.in_file {
            let err = structural(
                TAG_KML,
                "event stream ended before the file was closed",
                self.position,
            );
            self.fail(&err);
            return Err(err);
        }
        Ok(std::mem::take(&mut self.summary))
    }

    fn fail(&mut self, error: &ImportError) {
        self.failed = true;
        self.content = None;
        self.segment = None;
        self.track = None;
        self.pending_markers.clear();
        warn!("trackstore: [KmlTrackImporter] Import failed: {}", error);

        if self.config.failure_policy == FailurePolicy::DeleteImportedTracks
            && !self.summary.track_ids.is_empty()
        {
            warn!(
                "trackstore: [KmlTrackImporter] Deleting {} partially imported tracks",
                self.summary.track_ids.len()
            );
            match self.store.delete_tracks(&self.summary.track_ids) {
                Ok(()) => self.summary.track_ids.clear(),
                Err(e) => warn!("trackstore: [KmlTrackImporter] Cleanup failed: {}", e),
            }
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn start_element(
        &mut self,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), ImportError> {
        self.content = Some(String::new());

        match name {
            TAG_KML => self.on_file_start(),
            TAG_PLACEMARK | TAG_PHOTO_OVERLAY => {
                self.marker_depth += 1;
                self.scratch = MarkerFields::default();
            }
            TAG_GX_MULTI_TRACK => self.on_track_start(),
            TAG_GX_TRACK => self.on_segment_start()?,
            TAG_GX_SIMPLE_ARRAY_DATA => self.on_channel_start(attributes),
            _ => {}
        }
        Ok(())
    }

    fn end_element(&mut self, name: &str) -> Result<(), ImportError> {
        let content = self.content.take();
        let text = content.as_deref().map(str::trim);

        match name {
            TAG_KML => self.on_file_end()?,
            TAG_PLACEMARK | TAG_PHOTO_OVERLAY => self.on_marker_end()?,
            TAG_COORDINATES => self.on_marker_location(text)?,
            TAG_GX_MULTI_TRACK => self.on_track_end()?,
            TAG_GX_TRACK => self.on_segment_end()?,
            TAG_GX_SIMPLE_ARRAY_DATA => {
                if let Some(segment) = self.segment.as_mut() {
                    segment.channel = None;
                }
            }
            TAG_GX_COORD => self.on_point_end(text.unwrap_or_default())?,
            TAG_GX_VALUE => self.on_channel_value(text)?,
            TAG_WHEN => self.on_when(text)?,
            TAG_UUID => self.on_uuid(text)?,
            TAG_NAME | TAG_DESCRIPTION | TAG_ICON | TAG_VALUE => {
                if let Some(text) = text {
                    self.set_text_field(name, text.to_string());
                }
            }
            TAG_STYLE_URL => self.scratch.style = text.map(str::to_string),
            TAG_HREF => self.scratch.photo_url = text.map(str::to_string),
            _ => {}
        }
        Ok(())
    }

    /// Route a descriptive field to the innermost open track or marker candidate.
    fn set_text_field(&mut self, tag: &str, value: String) {
        let depth = self.marker_depth;
        if let Some(builder) = self.track.as_mut().filter(|b| depth <= b.marker_depth) {
            let track = &mut builder.track;
            match tag {
                TAG_NAME => track.name = value,
                TAG_DESCRIPTION => track.description = value,
                TAG_ICON => track.icon = value,
                TAG_VALUE => track.category = value,
                _ => {}
            }
            return;
        }

        let scratch = &mut self.scratch;
        let field = match tag {
            TAG_NAME => &mut scratch.name,
            TAG_DESCRIPTION => &mut scratch.description,
            TAG_ICON => &mut scratch.icon,
            TAG_VALUE => &mut scratch.category,
            _ => return,
        };
        *field = Some(value);
    }

    // ========================================================================
    // File
    // ========================================================================

    fn on_file_start(&mut self) {
        info!("trackstore: [KmlTrackImporter] Importing file");
        self.in_file = true;
        self.marker_depth = 0;
        self.scratch = MarkerFields::default();
        self.track = None;
        self.segment = None;
        self.pending_markers.clear();
        self.latest_track = None;
    }

    fn on_file_end(&mut self) -> Result<(), ImportError> {
        self.in_file = false;
        self.file_closed = true;
        self.segment = None;
        self.track = None;

        if self.summary.track_ids.is_empty() {
            return Err(structural(TAG_KML, "file contains no gx:MultiTrack", self.position));
        }

        for track_id in self.summary.track_ids.clone() {
            self.finalize_track(track_id)?;
        }

        info!(
            "trackstore: [KmlTrackImporter] Imported {} tracks, {} points, {} markers",
            self.summary.track_ids.len(),
            self.summary.point_count,
            self.summary.marker_count
        );
        Ok(())
    }

    /// Recompute statistics and fill in marker length and duration in one pass.
    fn finalize_track(&self, track_id: TrackId) -> Result<(), ImportError> {
        let Some(mut track) = self.store.get_track(track_id)? else {
            return Ok(());
        };
        let mut markers = self.store.get_markers(track_id)?;
        markers.sort_by_key(|m| m.time);

        let mut updater = TrackStatisticsUpdater::new();
        let mut next_marker = 0;
        for point in self.store.get_point_sequence(track_id, None) {
            let point = point?;
            while let Some(marker) = markers.get_mut(next_marker).filter(|m| m.time < point.time) {
                set_marker_progress(marker, updater.statistics());
                next_marker += 1;
            }
            updater.add_point(&point);
        }
        for marker in &mut markers[next_marker..] {
            set_marker_progress(marker, updater.statistics());
        }

        track.statistics = updater.into_statistics();
        self.store.update_track(&track)?;
        for marker in &markers {
            self.store.update_marker(marker)?;
        }
        Ok(())
    }

    // ========================================================================
    // Track
    // ========================================================================

    fn on_track_start(&mut self) {
        let fields = &self.scratch;
        let mut track = Track::new(fields.name.clone().unwrap_or_default());
        track.description = fields.description.clone().unwrap_or_default();
        track.category = fields.category.clone().unwrap_or_default();
        track.icon = fields.icon.clone().unwrap_or_default();
        if let Some(uuid) = fields.uuid {
            track.uuid = uuid;
        }

        debug!("trackstore: [KmlTrackImporter] Track {} opened", track.uuid);
        self.track = Some(TrackBuilder {
            track,
            id: None,
            marker_depth: self.marker_depth,
        });
        self.segment = None;
    }

    fn on_track_end(&mut self) -> Result<(), ImportError> {
        if self.track.is_none() {
            return Ok(());
        }
        self.segment = None;

        let track_id = self.ensure_track_inserted()?;
        if let Some(builder) = self.track.take() {
            let mut track = builder.track;
            track.id = Some(track_id);
            self.store.update_track(&track)?;
        }
        Ok(())
    }

    fn on_uuid(&mut self, text: Option<&str>) -> Result<(), ImportError> {
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        let uuid = Uuid::parse_str(text).map_err(|_| value_parse(TAG_UUID, text, self.position))?;

        if self.in_nested_marker() {
            self.scratch.uuid = Some(uuid);
            return Ok(());
        }
        match self.track.as_mut() {
            Some(builder) if builder.id.is_none() => builder.track.uuid = uuid,
            Some(_) => {}
            None => self.scratch.uuid = Some(uuid),
        }
        Ok(())
    }

    /// Insert the open track's row if that has not happened yet.
    fn ensure_track_inserted(&mut self) -> Result<TrackId, ImportError> {
        let position = self.position;
        let builder = self
            .track
            .as_mut()
            .ok_or_else(|| structural(TAG_GX_TRACK, "segment outside of gx:MultiTrack", position))?;
        if let Some(id) = builder.id {
            return Ok(id);
        }

        let uuid = builder.track.uuid;
        if self.store.get_track_by_uuid(&uuid)?.is_some() {
            return Err(ImportError::AlreadyExists(uuid));
        }
        let id = self.store.insert_track(&builder.track)?;
        builder.id = Some(id);

        self.latest_track = Some(id);
        self.summary.track_ids.push(id);
        for fields in std::mem::take(&mut self.pending_markers) {
            self.insert_marker(fields, id)?;
        }
        Ok(id)
    }

    // ========================================================================
    // Segment
    // ========================================================================

    fn on_segment_start(&mut self) -> Result<(), ImportError> {
        if self.track.is_none() {
            return Err(structural(
                TAG_GX_TRACK,
                "segment outside of gx:MultiTrack",
                self.position,
            ));
        }
        self.segment = Some(SegmentBuffer::default());
        Ok(())
    }

    fn on_segment_end(&mut self) -> Result<(), ImportError> {
        let Some(SegmentBuffer {
            mut points,
            channels,
            ..
        }) = self.segment.take()
        else {
            return Ok(());
        };

        channels.merge_into(&mut points);

        let received = points.len();
        points.retain(|p| p.has_location() || p.point_type.allows_missing_location());
        if points.len() < received {
            warn!(
                "trackstore: [KmlTrackImporter] Dropped {} points without location",
                received - points.len()
            );
        }

        let track_id = self.ensure_track_inserted()?;
        let ids = self.store.bulk_insert_points(&points, track_id)?;
        self.summary.point_count += ids.len();
        Ok(())
    }

    /// Inside a segment every `when` belongs to one point, so a blank one fails.
    fn on_when(&mut self, text: Option<&str>) -> Result<(), ImportError> {
        let position = self.position;
        let text = text.filter(|t| !t.is_empty());

        match (self.segment.as_mut(), text) {
            (Some(segment), Some(text)) => {
                let time = parse_time(TAG_WHEN, text, position)?;
                segment.pending_times.push_back(time);
            }
            (Some(_), None) => return Err(missing(TAG_WHEN, position)),
            (None, Some(text)) => self.scratch.time = Some(parse_time(TAG_WHEN, text, position)?),
            (None, None) => {}
        }
        Ok(())
    }

    fn on_point_end(&mut self, text: &str) -> Result<(), ImportError> {
        let position = self.position;
        let Some(segment) = self.segment.as_mut() else {
            debug!("trackstore: [KmlTrackImporter] Ignoring gx:coord outside of gx:Track");
            return Ok(());
        };

        let coordinates = parse_coordinates(TAG_GX_COORD, text, text.split_whitespace(), position)?;
        let time = segment.pending_times.pop_front().ok_or_missing(TAG_WHEN, position)?;

        let point_type = match (segment.points.is_empty(), &coordinates) {
            (true, None) => TrackPointType::SegmentStartManual,
            (true, Some(_)) => TrackPointType::SegmentStartAutomatic,
            (false, _) => TrackPointType::TrackPoint,
        };
        let mut point = TrackPoint::at(point_type, time);
        if let Some((location, altitude)) = coordinates {
            point.location = Some(location);
            point.altitude = altitude;
        }
        segment.points.push(point);
        Ok(())
    }

    fn on_channel_start(&mut self, attributes: &HashMap<String, String>) {
        let Some(segment) = self.segment.as_mut() else {
            return;
        };
        let name = attributes.get(ATTRIBUTE_NAME).map_or("", String::as_str);
        let slot = match SensorChannel::from_name(name) {
            Some(channel) => ChannelSlot::Known(channel),
            None => {
                warn!(
                    "trackstore: [KmlTrackImporter] Extended data '{}' is not supported",
                    name
                );
                ChannelSlot::Unsupported
            }
        };
        segment.channel = Some(slot);
    }

    fn on_channel_value(&mut self, text: Option<&str>) -> Result<(), ImportError> {
        let value = match text.filter(|t| !t.is_empty()) {
            Some(raw) => Some(
                raw.parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| value_parse(TAG_GX_VALUE, raw, self.position))?,
            ),
            None => None,
        };

        if let Some(segment) = self.segment.as_mut() {
            if let Some(ChannelSlot::Known(channel)) = segment.channel {
                segment.channels.push(channel, value);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Marker
    // ========================================================================

    fn on_marker_location(&mut self, text: Option<&str>) -> Result<(), ImportError> {
        let Some(text) = text else {
            return Ok(());
        };
        if let Some((location, altitude)) =
            parse_coordinates(TAG_COORDINATES, text, text.split(','), self.position)?
        {
            self.scratch.location = Some(location);
            self.scratch.altitude = altitude;
        }
        Ok(())
    }

    fn on_marker_end(&mut self) -> Result<(), ImportError> {
        let nested_in_track = self.track.is_some() && self.in_nested_marker();
        self.marker_depth = self.marker_depth.saturating_sub(1);
        let fields = std::mem::take(&mut self.scratch);

        // Placemarks wrapping a track carry a different style.
        if fields.style.as_deref() != Some(MARKER_STYLE) {
            return Ok(());
        }
        if !fields.is_complete() {
            warn!(
                "trackstore: [KmlTrackImporter] Skipping marker '{}' without location or time",
                fields.name.as_deref().unwrap_or_default()
            );
            self.summary.discarded_markers += 1;
            return Ok(());
        }

        // A marker inside an open track belongs to it, even before its row exists.
        let target = if nested_in_track {
            self.track.as_ref().and_then(|builder| builder.id)
        } else {
            self.latest_track
        };
        match target {
            Some(track_id) => self.insert_marker(fields, track_id),
            None => {
                self.pending_markers.push(fields);
                Ok(())
            }
        }
    }

    fn insert_marker(&mut self, fields: MarkerFields, track_id: TrackId) -> Result<(), ImportError> {
        if let Some(marker) = fields.into_marker(track_id) {
            self.store.insert_marker(&marker)?;
            self.summary.marker_count += 1;
        }
        Ok(())
    }
}
