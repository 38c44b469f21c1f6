use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs2::FileExt;

use crate::error::CacheError;

struct Entry {
    path: PathBuf,
    atime: SystemTime,
    size: u64,
}

/// Two-phase (age, then size) scan over a flat cache root.
pub(crate) struct EvictionEngine<'a> {
    pub(crate) cache_root: &'a Path,
}

impl EvictionEngine<'_> {
    pub(crate) async fn prune(
        &self,
        max_age: Option<Duration>,
        max_size: Option<u64>,
    ) -> Result<(), CacheError> {
        let entries = self.scan().await?;
        let now = SystemTime::now();

        let mut total: u64 = 0;
        let mut survivors = Vec::with_capacity(entries.len());
        for entry in entries {
            let expired = max_age.is_some_and(|limit| {
                now.duration_since(entry.atime)
                    .map(|age| age > limit)
                    .unwrap_or(false)
            });
            if expired && safe_delete(&entry.path).await {
                continue;
            }
            total += entry.size;
            survivors.push(entry);
        }

        if let Some(max_size) = max_size
            && total > max_size
        {
            survivors.sort_by_key(|e| e.atime);
            for entry in survivors {
                if total <= max_size {
                    break;
                }
                if safe_delete(&entry.path).await {
                    total = total.saturating_sub(entry.size);
                }
            }
        }

        Ok(())
    }

    pub(crate) async fn clear(&self) -> Result<(), CacheError> {
        for entry in self.scan().await? {
            safe_delete(&entry.path).await;
        }
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<Entry>, CacheError> {
        let mut read_dir = match tokio::fs::read_dir(self.cache_root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::IoError(e)),
        };

        let mut entries = Vec::new();
        while let Some(dir_entry) = read_dir.next_entry().await? {
            let Ok(meta) = dir_entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let atime = meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(Entry {
                path: dir_entry.path(),
                atime,
                size: meta.len(),
            });
        }
        Ok(entries)
    }
}

/// Open the candidate, attempt a non-blocking exclusive lock, and unlink
/// only if granted. Returns whether the delete happened.
async fn safe_delete(path: &Path) -> bool {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let Ok(file) = std::fs::OpenOptions::new().read(true).open(&path) else {
            return false;
        };
        if FileExt::try_lock_exclusive(&file).is_err() {
            return false;
        }
        let deleted = std::fs::remove_file(&path).is_ok();
        let _ = FileExt::unlock(&file);
        deleted
    })
    .await
    .unwrap_or(false)
}
