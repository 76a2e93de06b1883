//! # Track Import
//!
//! Rebuilds tracks, segments, sensor channels and markers from a stream of
//! structural parse events and persists them through a [`crate::TrackStore`].
//!
//! Tokenizing the file is left to the caller: any streaming XML reader can
//! drive the importer by translating its callbacks into [`ParseEvent`]s.

use std::collections::HashMap;

use serde::Serialize;

use crate::TrackId;

mod channels;
mod kml;

pub use channels::SensorChannel;
pub use kml::{ImportState, KmlTrackImporter, MARKER_STYLE};

/// One structural event of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    StartElement {
        name: String,
        attributes: HashMap<String, String>,
    },
    /// Character data. Consecutive events for one element are concatenated.
    Text(String),
    EndElement {
        name: String,
    },
}

impl ParseEvent {
    pub fn start(name: impl Into<String>) -> Self {
        ParseEvent::StartElement {
            name: name.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn start_with(name: impl Into<String>, attributes: &[(&str, &str)]) -> Self {
        ParseEvent::StartElement {
            name: name.into(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        ParseEvent::Text(text.into())
    }

    pub fn end(name: impl Into<String>) -> Self {
        ParseEvent::EndElement { name: name.into() }
    }

    /// Start, text and end events of a leaf element.
    pub fn leaf(name: &str, text: impl Into<String>) -> [ParseEvent; 3] {
        [Self::start(name), Self::text(text), Self::end(name)]
    }
}

/// What an import created.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    /// Tracks created, in file order
    pub track_ids: Vec<TrackId>,
    pub point_count: usize,
    pub marker_count: usize,
    /// Marker candidates dropped for lacking a location or timestamp
    pub discarded_markers: usize,
}
