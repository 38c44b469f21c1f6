use std::sync::Arc;
use std::time::Duration;

use file_cache_disks::{Disk, DiskRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::CacheError;

const CHUNK_SIZE: usize = 64 * 1024;

/// Streams an object from a named non-local disk into a cache-entry file
/// descriptor.
pub(crate) struct DiskReader<'a> {
    registry: &'a dyn DiskRegistry,
}

impl<'a> DiskReader<'a> {
    pub(crate) fn new(registry: &'a dyn DiskRegistry) -> Self {
        Self { registry }
    }

    pub(crate) fn resolve(&self, disk_name: &str) -> Result<Arc<dyn Disk>, CacheError> {
        self.registry
            .get(disk_name)
            .ok_or_else(|| CacheError::UnknownDisk {
                name: disk_name.to_string(),
            })
    }

    pub(crate) async fn fetch_into(
        &self,
        disk_name: &str,
        object_path: &str,
        sink: &mut tokio::fs::File,
        timeout: Duration,
        max_file_size: Option<u64>,
    ) -> Result<(), CacheError> {
        let disk = self.resolve(disk_name)?;
        let url = format!("{disk_name}://{object_path}");
        let fetch_failed = |reason: String| CacheError::FetchFailed {
            url: url.clone(),
            reason,
        };
        let timed_out = || CacheError::SourceTimeout { url: url.clone() };

        let mut reader = tokio::time::timeout(timeout, disk.open_read_stream(object_path))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| fetch_failed(e.to_string()))?;

        let mut buf = vec![0_u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = tokio::time::timeout(timeout, reader.read(&mut buf))
                .await
                .map_err(|_| timed_out())?
                .map_err(|e| fetch_failed(e.to_string()))?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if let Some(limit) = max_file_size
                && written >= limit
            {
                return Err(CacheError::FileTooLarge {
                    url: url.clone(),
                    limit,
                });
            }
            sink.write_all(&buf[..n]).await?;
        }
        sink.flush().await?;
        Ok(())
    }
}
