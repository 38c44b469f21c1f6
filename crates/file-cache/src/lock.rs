//! Blocking advisory-lock primitives, run off the async runtime.
//!
//! `fs2` locks are plain blocking syscalls (`flock(2)` on Unix), so every
//! call here is wrapped in [`tokio::task::spawn_blocking`].

use std::fs::File;

use fs2::FileExt;

pub(crate) async fn lock_exclusive(file: File) -> std::io::Result<File> {
    tokio::task::spawn_blocking(move || {
        FileExt::lock_exclusive(&file)?;
        Ok(file)
    })
    .await
    .expect("lock_exclusive blocking task panicked")
}

/// Acquire a shared lock. Also used to *downgrade* an exclusive lock held
/// on the same descriptor: `flock` converts a held lock's mode atomically
/// when called again on the same fd, so no unlock/relock gap exists.
pub(crate) async fn lock_shared(file: File) -> std::io::Result<File> {
    tokio::task::spawn_blocking(move || {
        FileExt::lock_shared(&file)?;
        Ok(file)
    })
    .await
    .expect("lock_shared blocking task panicked")
}

pub(crate) fn touch(file: &File) {
    let now = filetime::FileTime::now();
    if let Err(error) = filetime::set_file_handle_times(file, Some(now), Some(now)) {
        tracing::warn!(%error, "failed to touch cache entry times");
    }
}
