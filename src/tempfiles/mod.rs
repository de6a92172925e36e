//! Per-request temporary file tracking.
//!
//! Every temp path a request creates is registered here at creation time and
//! released through a single mechanism that runs on all exit paths - normal
//! return, early `?` return, or panic (via `Drop`).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Registry of temporary files owned by a single request.
///
/// Paths are drained under a lock, so each file is removed at most once even
/// if `release_all` races with `Drop`. A missing file is not an error; any
/// other removal failure is logged and swallowed.
#[derive(Debug, Default)]
pub struct TempTracker {
    paths: Mutex<Vec<PathBuf>>,
}

impl TempTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path for removal when the request finishes.
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::debug!("Tracking temp file: {}", path.display());
        self.paths.lock().expect("temp tracker poisoned").push(path);
    }

    /// Number of paths currently tracked.
    pub fn len(&self) -> usize {
        self.paths.lock().expect("temp tracker poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every tracked file now. Safe to call more than once.
    pub fn release_all(&self) {
        let drained: Vec<PathBuf> = {
            let mut paths = self.paths.lock().expect("temp tracker poisoned");
            paths.drain(..).collect()
        };

        for path in drained {
            remove_quietly(&path);
        }
    }
}

impl Drop for TempTracker {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn remove_quietly(path: &Path) {
    match fs_err::remove_file(path) {
        Ok(()) => tracing::debug!("Removed temp file: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove temp file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_release_all_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"x").unwrap();

        let tracker = TempTracker::new();
        tracker.register(&a);
        tracker.register(&b);
        tracker.release_all();

        assert!(!a.exists());
        assert!(!b.exists());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_drop_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        fs::write(&a, b"x").unwrap();

        {
            let tracker = TempTracker::new();
            tracker.register(&a);
        }

        assert!(!a.exists());
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = TempTracker::new();
        tracker.register(dir.path().join("never-created.mp3"));
        tracker.release_all();
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        fs::write(&a, b"x").unwrap();

        let tracker = TempTracker::new();
        tracker.register(&a);
        tracker.release_all();
        tracker.release_all();
        assert!(!a.exists());
    }
}
