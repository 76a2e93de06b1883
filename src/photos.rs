//! Marker photo assets.
//!
//! Photos are stored per track (`<root>/<track_id>/<file>`). A marker's
//! `photo_url` references its file by the last path segment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::TrackId;

/// Blob storage for marker photos, keyed by track.
pub trait PhotoStore: Send + Sync {
    /// Whether the photo referenced by `photo_url` exists.
    fn exists(&self, track_id: TrackId, photo_url: &str) -> bool;

    /// Delete one photo, then its track directory if that became empty.
    fn delete_photo(&self, track_id: TrackId, photo_url: &str) -> io::Result<()>;

    /// Delete all photos of a track together with the directory.
    fn delete_track_photos(&self, track_id: TrackId) -> io::Result<()>;

    /// Delete every photo of every track.
    fn delete_all(&self) -> io::Result<()>;
}

/// Filesystem-backed [`PhotoStore`].
#[derive(Debug, Clone)]
pub struct FsPhotoStore {
    root: PathBuf,
}

impl FsPhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the photos of a track.
    pub fn track_dir(&self, track_id: TrackId) -> PathBuf {
        self.root.join(track_id.0.to_string())
    }

    /// File a photo URL resolves to, if the URL names a file.
    pub fn photo_path(&self, track_id: TrackId, photo_url: &str) -> Option<PathBuf> {
        let file_name = photo_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")?;
        Some(self.track_dir(track_id).join(file_name))
    }
}

fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl PhotoStore for FsPhotoStore {
    fn exists(&self, track_id: TrackId, photo_url: &str) -> bool {
        self.photo_path(track_id, photo_url)
            .is_some_and(|path| path.is_file())
    }

    fn delete_photo(&self, track_id: TrackId, photo_url: &str) -> io::Result<()> {
        let Some(path) = self.photo_path(track_id, photo_url) else {
            return Ok(());
        };
        if !path.is_file() {
            return Ok(());
        }

        fs::remove_file(&path)?;
        debug!("trackstore: [FsPhotoStore] Deleted photo {}", path.display());

        if let Some(parent) = path.parent() {
            if fs::read_dir(parent)?.next().is_none() {
                fs::remove_dir(parent)?;
            }
        }
        Ok(())
    }

    fn delete_track_photos(&self, track_id: TrackId) -> io::Result<()> {
        remove_dir_if_exists(&self.track_dir(track_id))
    }

    fn delete_all(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_photo(store: &FsPhotoStore, track_id: TrackId, name: &str) -> PathBuf {
        let dir = store.track_dir(track_id);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"jpeg").unwrap();
        path
    }

    #[test]
    fn test_photo_path_uses_last_segment() {
        let store = FsPhotoStore::new("/photos");
        assert_eq!(
            store.photo_path(TrackId(3), "content://app/photos/3/a.jpg"),
            Some(PathBuf::from("/photos/3/a.jpg"))
        );
        assert_eq!(store.photo_path(TrackId(3), ""), None);
        assert_eq!(store.photo_path(TrackId(3), "x/.."), None);
    }

    #[test]
    fn test_delete_last_photo_removes_directory() {
        let tmp = TempDir::new().unwrap();
        let store = FsPhotoStore::new(tmp.path());
        write_photo(&store, TrackId(1), "a.jpg");
        write_photo(&store, TrackId(1), "b.jpg");

        store.delete_photo(TrackId(1), "a.jpg").unwrap();
        assert!(store.track_dir(TrackId(1)).is_dir());
        assert!(!store.exists(TrackId(1), "a.jpg"));

        store.delete_photo(TrackId(1), "b.jpg").unwrap();
        assert!(!store.track_dir(TrackId(1)).exists());
    }

    #[test]
    fn test_delete_missing_photo_is_ok() {
        let tmp = TempDir::new().unwrap();
        let store = FsPhotoStore::new(tmp.path());
        store.delete_photo(TrackId(9), "nope.jpg").unwrap();
        store.delete_track_photos(TrackId(9)).unwrap();
    }
}
