//! Unified error handling for the track store and the importer.
//!
//! Lookups by id never fail with "not found": they return `Ok(None)`.
//! Errors are reserved for storage failures and for fatal import problems.

use std::fmt;

use uuid::Uuid;

/// Position of a parse event inside the source file, when the parser reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePosition {
    pub line: u64,
    pub column: u64,
}

impl FilePosition {
    pub fn new(line: u64, column: u64) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for FilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Renders an optional position as a message suffix.
struct At<'a>(&'a Option<FilePosition>);

impl fmt::Display for At<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(position) => write!(f, " at {}", position),
            None => Ok(()),
        }
    }
}

/// Errors raised by [`crate::TrackStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Schema migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("Store connection lock poisoned")]
    LockPoisoned,

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Errors raised while importing a file. All of them abort the import.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// A required container is missing, e.g. a segment outside its track.
    #[error("Structural error in <{element}>{}: {context}", At(.position))]
    Structural {
        element: String,
        context: String,
        position: Option<FilePosition>,
    },

    /// Text that should hold a number or timestamp could not be parsed.
    #[error("Unable to parse <{element}> value '{raw}'{}", At(.position))]
    ValueParse {
        element: String,
        raw: String,
        position: Option<FilePosition>,
    },

    /// A leaf closed without the value it depends on (e.g. a coordinate with no time).
    #[error("Missing value for <{element}>{}", At(.position))]
    MissingValue {
        element: String,
        position: Option<FilePosition>,
    },

    #[error("Track {0} already exists")]
    AlreadyExists(Uuid),

    /// The importer already failed; further events are rejected.
    #[error("Import was aborted by an earlier error")]
    Aborted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImportError {
    /// True for errors caused by the file content rather than by storage.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            ImportError::Structural { .. }
                | ImportError::ValueParse { .. }
                | ImportError::MissingValue { .. }
        )
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Extension trait for turning absent import values into errors.
pub trait OptionExt<T> {
    /// Convert `None` into [`ImportError::MissingValue`].
    fn ok_or_missing(
        self,
        element: &str,
        position: Option<FilePosition>,
    ) -> std::result::Result<T, ImportError>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing(
        self,
        element: &str,
        position: Option<FilePosition>,
    ) -> std::result::Result<T, ImportError> {
        self.ok_or_else(|| ImportError::MissingValue {
            element: element.to_string(),
            position,
        })
    }
}
