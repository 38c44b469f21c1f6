use std::path::PathBuf;

use file_cache_disks::Disk;

use crate::error::CacheError;

/// Resolves an object on a local-mount disk to its physical path. No bytes
/// are copied; the cache entry placeholder must be unlinked by the caller.
pub(crate) async fn resolve(disk: &dyn Disk, object_path: &str) -> Result<PathBuf, CacheError> {
    let prefix = disk
        .path_prefix()
        .expect("local disk must advertise a path prefix")
        .to_path_buf();
    let full_path = prefix.join(object_path);

    let exists = disk
        .exists(object_path)
        .await
        .map_err(CacheError::IoError)?;
    if !exists {
        return Err(CacheError::NotFound {
            url: full_path.display().to_string(),
        });
    }
    Ok(full_path)
}
