use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// A live hold on a cache entry, forbidding its eviction.
///
/// Realized as an open file descriptor holding an advisory lock (shared,
/// ordinarily; briefly exclusive during creation). Dropping the guard
/// closes the descriptor, which releases whatever lock it holds — this is
/// the scoped-acquisition primitive that guarantees release on every
/// control-flow exit, including panics.
pub struct PinGuard {
    file: Option<File>,
    path: PathBuf,
    cache_root: PathBuf,
}

impl PinGuard {
    pub(crate) fn new(file: File, path: PathBuf, cache_root: PathBuf) -> Self {
        Self {
            file: Some(file),
            path,
            cache_root,
        }
    }

    /// The local path this pin guarantees is readable for its lifetime.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `GetOnce`/`BatchOnce` semantics: attempt a non-blocking upgrade to
    /// an exclusive lock; if granted (no other reader is pinning the same
    /// entry), unlink it. Never unlinks a path outside the cache root
    /// (local-mount bypass files).
    pub(crate) fn try_mark_once(&self) {
        let Some(file) = self.file.as_ref() else {
            return;
        };
        if !self.path.starts_with(&self.cache_root) {
            return;
        }
        if FileExt::try_lock_exclusive(file).is_ok() {
            if let Err(error) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), %error, "failed to delete once-only cache entry");
            }
        }
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        // Dropping the descriptor releases the lock it holds.
        self.file.take();
    }
}
