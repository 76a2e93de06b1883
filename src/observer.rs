//! Change notification for store writes.
//!
//! Observers are held by `Weak` reference: a registration lives exactly as
//! long as the observer's own `Arc`, so nothing leaks into process-wide state.

use std::sync::{Arc, Mutex, Weak};

use crate::{MarkerId, TrackId};

/// A committed change to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum DataChange {
    TrackInserted(TrackId),
    TrackUpdated(TrackId),
    TracksDeleted(Vec<TrackId>),
    MarkerInserted { track_id: TrackId, marker_id: MarkerId },
    MarkerUpdated { track_id: TrackId, marker_id: MarkerId },
    MarkerDeleted { track_id: TrackId, marker_id: MarkerId },
    PointsInserted { track_id: TrackId, count: usize },
}

impl DataChange {
    fn kind(&self) -> DataKinds {
        match self {
            DataChange::TrackInserted(_)
            | DataChange::TrackUpdated(_)
            | DataChange::TracksDeleted(_) => DataKinds::TRACKS,
            DataChange::MarkerInserted { .. }
            | DataChange::MarkerUpdated { .. }
            | DataChange::MarkerDeleted { .. } => DataKinds::MARKERS,
            DataChange::PointsInserted { .. } => DataKinds::POINTS,
        }
    }
}

/// Which tables an observer listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataKinds {
    pub tracks: bool,
    pub markers: bool,
    pub points: bool,
}

impl DataKinds {
    pub const TRACKS: DataKinds = DataKinds { tracks: true, markers: false, points: false };
    pub const MARKERS: DataKinds = DataKinds { tracks: false, markers: true, points: false };
    pub const POINTS: DataKinds = DataKinds { tracks: false, markers: false, points: true };
    pub const ALL: DataKinds = DataKinds { tracks: true, markers: true, points: true };

    fn intersects(self, other: DataKinds) -> bool {
        (self.tracks && other.tracks)
            || (self.markers && other.markers)
            || (self.points && other.points)
    }
}

/// Receives notifications after each committed write.
///
/// Called on the writer's thread, after the store lock is released.
pub trait TrackDataObserver: Send + Sync {
    fn on_data_changed(&self, change: &DataChange);
}

struct Registration {
    observer: Weak<dyn TrackDataObserver>,
    kinds: DataKinds,
}

/// Registry of weakly held observers.
#[derive(Default)]
pub struct ObserverRegistry {
    registrations: Mutex<Vec<Registration>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for the given kinds of changes.
    ///
    /// Registering the same observer again replaces its kinds.
    pub fn register<O: TrackDataObserver + 'static>(&self, observer: &Arc<O>, kinds: DataKinds) {
        let observer: Arc<dyn TrackDataObserver> = observer.clone();
        let weak = Arc::downgrade(&observer);
        if let Ok(mut registrations) = self.registrations.lock() {
            registrations.retain(|r| r.observer.strong_count() > 0 && !r.observer.ptr_eq(&weak));
            registrations.push(Registration {
                observer: weak,
                kinds,
            });
        }
    }

    /// Remove an observer. Returns true if it was registered.
    pub fn unregister<O: TrackDataObserver + 'static>(&self, observer: &Arc<O>) -> bool {
        let observer: Arc<dyn TrackDataObserver> = observer.clone();
        let weak = Arc::downgrade(&observer);
        match self.registrations.lock() {
            Ok(mut registrations) => {
                let before = registrations.len();
                registrations.retain(|r| !r.observer.ptr_eq(&weak));
                registrations.len() != before
            }
            Err(_) => false,
        }
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.registrations
            .lock()
            .map(|registrations| {
                registrations
                    .iter()
                    .filter(|r| r.observer.strong_count() > 0)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Deliver a change to every live observer interested in it.
    pub fn notify(&self, change: &DataChange) {
        // Collect first so observers may call back into the registry.
        let targets: Vec<Arc<dyn TrackDataObserver>> = match self.registrations.lock() {
            Ok(mut registrations) => {
                registrations.retain(|r| r.observer.strong_count() > 0);
                registrations
                    .iter()
                    .filter(|r| r.kinds.intersects(change.kind()))
                    .filter_map(|r| r.observer.upgrade())
                    .collect()
            }
            Err(_) => return,
        };

        for observer in targets {
            observer.on_data_changed(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<DataChange>>,
    }

    impl TrackDataObserver for Recorder {
        fn on_data_changed(&self, change: &DataChange) {
            self.changes.lock().unwrap().push(change.clone());
        }
    }

    #[test]
    fn test_notify_filters_by_kind() {
        let registry = ObserverRegistry::new();
        let tracks = Arc::new(Recorder::default());
        let points = Arc::new(Recorder::default());
        registry.register(&tracks, DataKinds::TRACKS);
        registry.register(&points, DataKinds::POINTS);

        registry.notify(&DataChange::TrackInserted(TrackId(1)));
        registry.notify(&DataChange::PointsInserted {
            track_id: TrackId(1),
            count: 3,
        });

        assert_eq!(
            *tracks.changes.lock().unwrap(),
            vec![DataChange::TrackInserted(TrackId(1))]
        );
        assert_eq!(points.changes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_observer_is_released() {
        let registry = ObserverRegistry::new();
        let observer = Arc::new(Recorder::default());
        registry.register(&observer, DataKinds::ALL);
        assert_eq!(registry.observer_count(), 1);

        drop(observer);
        assert_eq!(registry.observer_count(), 0);
        registry.notify(&DataChange::TrackUpdated(TrackId(2)));
    }

    #[test]
    fn test_unregister_and_reregister() {
        let registry = ObserverRegistry::new();
        let observer = Arc::new(Recorder::default());
        registry.register(&observer, DataKinds::TRACKS);
        registry.register(&observer, DataKinds::MARKERS);
        assert_eq!(registry.observer_count(), 1);

        registry.notify(&DataChange::TrackUpdated(TrackId(2)));
        assert!(observer.changes.lock().unwrap().is_empty());

        assert!(registry.unregister(&observer));
        assert!(!registry.unregister(&observer));
        assert_eq!(registry.observer_count(), 0);
    }
}
