//! # Track Store
//!
//! SQLite-backed storage for tracks, markers and track points.
//!
//! ## Layout
//!
//! - `tracks`: track CRUD, cascading deletes, statistics recompute
//! - `markers`: marker CRUD with photo asset cleanup
//! - `points`: point inserts, point lookups, sensor aggregates
//! - `sequence`: forward-only sequences over bounded result windows
//!
//! The connection sits behind a mutex, so a `TrackStore` can be shared between
//! threads (e.g. a recording writer and a UI reader) through an `Arc`. Each
//! multi-row write runs in its own SQLite transaction. The lock is only held
//! for the duration of a single statement or transaction, never across the
//! windows of a sequence.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::observer::{DataChange, DataKinds, ObserverRegistry, TrackDataObserver};
use crate::photos::PhotoStore;
use crate::{StoreConfig, migrations};

mod markers;
mod points;
pub mod sequence;
mod tracks;

pub use sequence::{MarkerSequence, Sequence, SequenceItem, TrackPointSequence};

/// Storage for tracks, markers and points.
pub struct TrackStore {
    /// Database connection
    db: Mutex<Connection>,

    /// Configuration
    config: StoreConfig,

    /// Marker photo assets (optional; without it photo cleanup is skipped)
    photos: Option<Arc<dyn PhotoStore>>,

    /// Observers notified after each committed write
    observers: ObserverRegistry,
}

impl TrackStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) a store at the given database path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(db_path, StoreConfig::default())
    }

    /// Open (or create) a store with an explicit configuration.
    pub fn open_with_config(db_path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let db_path = db_path.as_ref();
        info!("trackstore: [TrackStore] Opening {}", db_path.display());
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn, config)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_config(StoreConfig::default())
    }

    /// Create an in-memory store with an explicit configuration.
    pub fn in_memory_with_config(config: StoreConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, config)
    }

    fn from_connection(mut conn: Connection, config: StoreConfig) -> Result<Self> {
        migrations::apply(&mut conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            config,
            photos: None,
            observers: ObserverRegistry::new(),
        })
    }

    /// Attach a photo store used to clean up marker photos on delete.
    pub fn with_photo_store(mut self, photos: Arc<dyn PhotoStore>) -> Self {
        self.photos = Some(photos);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Register an observer. The registration ends when the observer is dropped.
    pub fn register_observer<O: TrackDataObserver + 'static>(
        &self,
        observer: &Arc<O>,
        kinds: DataKinds,
    ) {
        self.observers.register(observer, kinds);
    }

    /// Unregister an observer. Returns true if it was registered.
    pub fn unregister_observer<O: TrackDataObserver + 'static>(&self, observer: &Arc<O>) -> bool {
        self.observers.unregister(observer)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Lock the connection for one statement or transaction.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Notify observers. Must be called after the connection lock is released.
    pub(crate) fn notify(&self, change: DataChange) {
        self.observers.notify(&change);
    }

    pub(crate) fn photos(&self) -> Option<&Arc<dyn PhotoStore>> {
        self.photos.as_ref()
    }
}

// ============================================================================
// Column conversion helpers
// ============================================================================

/// Convert a stored epoch-millisecond value into a timestamp.
pub(crate) fn time_from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {}", millis).into(),
        )
    })
}

/// Convert a duration to stored milliseconds, saturating at `i64::MAX`.
pub(crate) fn duration_to_millis(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Convert stored milliseconds to a duration; negative values clamp to zero.
pub(crate) fn duration_from_millis(millis: i64) -> std::time::Duration {
    std::time::Duration::from_millis(millis.max(0) as u64)
}

/// `?, ?, ?` placeholder list for an `IN (...)` clause.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TrackStore>();
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_duration_millis_roundtrip() {
        let d = std::time::Duration::from_millis(90_500);
        assert_eq!(duration_from_millis(duration_to_millis(d)), d);
        assert_eq!(duration_from_millis(-5), std::time::Duration::ZERO);
    }

    #[test]
    fn test_open_file_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("tracks.db");
        let store = TrackStore::open(&path).unwrap();
        assert!(store.get_tracks().unwrap().is_empty());
        drop(store);

        // Reopening an existing database must not re-run migrations.
        let store = TrackStore::open(&path).unwrap();
        assert!(store.get_tracks().unwrap().is_empty());
    }
}
