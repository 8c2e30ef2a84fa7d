//! In-process and cross-process project locking.
//!
//! Writers serialize first on a per-project async mutex held in a
//! [`ProjectLocks`] registry, then on an exclusive OS lock over
//! `<file>.lock`. The registry keeps two tasks of the same process from racing
//! for the OS lock; the OS lock covers other processes.

use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::error::LockFileSnafu;
use crate::error::Result;

/// Registry of per-project mutexes.
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct ProjectLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ProjectLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutex for `project`, creating it on first use.
    pub async fn lock(&self, project: &str) -> OwnedMutexGuard<()> {
        let mutex = self.inner.entry(project.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        mutex.lock_owned().await
    }

    /// Number of projects that have been locked at least once.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no project has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Exclusive OS lock on `<target>.lock`, released on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    /// Block until the exclusive lock for `target` is held.
    pub fn acquire(target: &Path) -> Result<Self> {
        let mut lock_path = target.as_os_str().to_owned();
        lock_path.push(".lock");
        let path = PathBuf::from(lock_path);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .context(LockFileSnafu { path: path.clone() })?;
        fs4::fs_std::FileExt::lock_exclusive(&file).context(LockFileSnafu { path: path.clone() })?;

        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs4::fs_std::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release project lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test]
    async fn test_same_project_is_serialized() {
        let locks = ProjectLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("demo").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_file_lock_creates_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("project.json");
        let guard = FileLockGuard::acquire(&target).unwrap();
        assert!(guard.path().ends_with("project.json.lock"));
        assert!(guard.path().exists());
        drop(guard);
        // Re-acquiring after release must not block.
        let _again = FileLockGuard::acquire(&target).unwrap();
    }
}
