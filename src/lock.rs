//! Primary election through an exclusive lock on a version-keyed file.
//!
//! The lock file lives at `<cache_dir>/<app>-<version>.lock`, with the dots
//! of the version replaced by dashes.  Whoever holds the lock is the primary
//! instance.  The lock is never released explicitly; the operating system
//! drops it when the owning process exits, crashed or not, so a stale lock
//! file on disk is harmless.

use fs2::FileExt;
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Turn a version string into a filesystem-safe key (`2.7.1` → `2-7-1`).
pub fn normalize_version(version: &str) -> String {
    version.replace('.', "-")
}

#[derive(Debug, thiserror::Error)]
enum LockError {
    #[error("cannot create {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("held by another process")]
    Contended,
    #[error("lock failed: {0}")]
    Lock(io::Error),
}

/// Decides whether this process is the primary instance.
///
/// The coordinator keeps the locked file open for as long as it lives; the
/// host is expected to keep it alive for the whole process lifetime.
#[derive(Debug)]
pub struct LockCoordinator {
    cache_dir: PathBuf,
    app_name: String,
    handle: Option<File>,
}

impl LockCoordinator {
    /// Create a coordinator that keeps its lock files in `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>, app_name: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            app_name: app_name.into(),
            handle: None,
        }
    }

    /// Path of the lock file for `version`.
    pub fn lock_path(&self, version: &str) -> PathBuf {
        self.cache_dir.join(format!(
            "{}-{}.lock",
            self.app_name,
            normalize_version(version)
        ))
    }

    /// Try to take the exclusive lock for `version` without blocking.
    ///
    /// Returns `true` iff the lock was newly acquired by this call.  Every
    /// failure, whether contention or an I/O error, yields `false`.
    pub fn try_become_primary(&mut self, version: &str) -> bool {
        if self.handle.is_some() {
            debug!("lock already held by this process");
            return false;
        }
        let path = self.lock_path(version);
        match acquire(&path) {
            Ok(file) => {
                info!("acquired instance lock {}", path.display());
                self.handle = Some(file);
                true
            }
            Err(e) => {
                debug!("instance lock {} not acquired: {}", path.display(), e);
                false
            }
        }
    }

    /// Whether this coordinator holds the lock.
    pub fn is_primary(&self) -> bool {
        self.handle.is_some()
    }
}

fn acquire(path: &Path) -> Result<File, LockError> {
    let open_err = |source| LockError::Open {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(open_err)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(open_err)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(LockError::Contended),
        Err(e) => Err(LockError::Lock(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn version_dots_become_dashes() {
        assert_eq!(normalize_version("2.7.1-rc2"), "2-7-1-rc2");
        let c = LockCoordinator::new("/cache", "app");
        assert_eq!(c.lock_path("1.0"), PathBuf::from("/cache/app-1-0.lock"));
    }

    #[test]
    fn first_attempt_wins_and_creates_the_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("nested").join("cache");
        let mut c = LockCoordinator::new(&cache, "app");
        assert!(c.try_become_primary("1.2.3"));
        assert!(c.is_primary());
        assert!(cache.join("app-1-2-3.lock").exists());
    }

    #[test]
    fn second_holder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = LockCoordinator::new(dir.path(), "app");
        let mut second = LockCoordinator::new(dir.path(), "app");
        assert!(first.try_become_primary("1.0"));
        assert!(!second.try_become_primary("1.0"));
        assert!(!second.is_primary());
    }

    #[test]
    fn repeated_attempt_is_not_a_new_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = LockCoordinator::new(dir.path(), "app");
        assert!(c.try_become_primary("1.0"));
        assert!(!c.try_become_primary("1.0"));
        assert!(c.is_primary());
    }

    #[test]
    fn different_versions_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = LockCoordinator::new(dir.path(), "app");
        let mut b = LockCoordinator::new(dir.path(), "app");
        assert!(a.try_become_primary("1.0"));
        assert!(b.try_become_primary("1.1"));
    }

    #[test]
    fn dropping_the_holder_frees_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = LockCoordinator::new(dir.path(), "app");
        assert!(first.try_become_primary("1.0"));
        drop(first);
        let mut second = LockCoordinator::new(dir.path(), "app");
        assert!(second.try_become_primary("1.0"));
    }

    #[test]
    fn unusable_cache_dir_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        File::create(&blocker).unwrap();
        let mut c = LockCoordinator::new(blocker.join("cache"), "app");
        assert!(!c.try_become_primary("1.0"));
        assert!(!c.is_primary());
    }

    #[test]
    fn racing_contenders_elect_exactly_one_primary() {
        let dir = tempfile::tempdir().unwrap();
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));
        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let cache = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let mut c = LockCoordinator::new(cache, "app");
                    barrier.wait();
                    let won = c.try_become_primary("3.1.4");
                    // Keep the coordinator alive so the winner holds on.
                    (won, c)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|(won, _)| *won).count(), 1);
    }
}
