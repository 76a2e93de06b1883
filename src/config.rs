//! Store and import configuration.

use std::env;

/// Smallest usable result window. A continuation query re-reads the last
/// consumed row, so a window of one row could never make progress.
pub const MIN_RESULT_WINDOW_ROWS: usize = 2;

/// Configuration for a [`crate::TrackStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Maximum number of rows materialized per query by point and marker sequences.
    pub result_window_rows: usize,
    /// Run `VACUUM` after deleting tracks.
    pub vacuum_on_delete: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            result_window_rows: 1024,
            vacuum_on_delete: true,
        }
    }
}

impl StoreConfig {
    /// Load overrides from `TRACKSTORE_RESULT_WINDOW` and `TRACKSTORE_VACUUM_ON_DELETE`.
    ///
    /// Missing or unparseable variables keep their default value.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let result_window_rows = env::var("TRACKSTORE_RESULT_WINDOW")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.result_window_rows);

        let vacuum_on_delete = env::var("TRACKSTORE_VACUUM_ON_DELETE")
            .ok()
            .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => None,
            })
            .unwrap_or(defaults.vacuum_on_delete);

        Self {
            result_window_rows,
            vacuum_on_delete,
        }
    }

    /// Set the result window size.
    pub fn with_result_window(mut self, rows: usize) -> Self {
        self.result_window_rows = rows;
        self
    }

    /// Result window clamped to [`MIN_RESULT_WINDOW_ROWS`].
    pub fn effective_window(&self) -> usize {
        self.result_window_rows.max(MIN_RESULT_WINDOW_ROWS)
    }
}

/// What happens to already committed data when an import fails part-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Segments and markers committed before the failure stay in the store.
    #[default]
    KeepCommitted,
    /// Every track created by the failed import is deleted again.
    DeleteImportedTracks,
}

/// Configuration for a [`crate::KmlTrackImporter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportConfig {
    pub failure_policy: FailurePolicy,
}

impl ImportConfig {
    pub fn with_failure_policy(failure_policy: FailurePolicy) -> Self {
        Self { failure_policy }
    }
}
