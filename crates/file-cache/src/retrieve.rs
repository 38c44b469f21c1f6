use std::net::IpAddr;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use file_cache_disks::{DiskKind, DiskRegistry};

use crate::error::CacheError;
use crate::lock::{lock_exclusive, lock_shared, touch};
use crate::pin::PinGuard;
use crate::scheme::split_scheme;
use crate::source::disk::DiskReader;
use crate::source::local;
use crate::source::remote::RemoteReader;

/// Bound on the writer-crashed retry loop (spec §9: prefer an iterative
/// bound over the source's unbounded recursion).
const MAX_RETRIEVE_ATTEMPTS: u32 = 3;

pub(crate) struct RetrieveEngine {
    pub(crate) cache_root: PathBuf,
    pub(crate) disks: Arc<dyn DiskRegistry>,
    pub(crate) client: reqwest::Client,
    pub(crate) timeout: Duration,
    pub(crate) max_file_size: Option<u64>,
    pub(crate) mime_types: Option<Vec<String>>,
    pub(crate) bind_ip: Option<IpAddr>,
}

impl RetrieveEngine {
    #[tracing::instrument(level = "debug", skip(self), fields(url, role))]
    pub(crate) async fn retrieve(&self, url: &str) -> Result<(PathBuf, PinGuard), CacheError> {
        tokio::fs::create_dir_all(&self.cache_root).await?;
        let key = crate::key::key_for(url);
        let cached_path = self.cache_root.join(&key);

        for attempt in 1..=MAX_RETRIEVE_ATTEMPTS {
            match self.try_create(&cached_path).await {
                Ok(file) => {
                    tracing::Span::current().record("role", "creator");
                    return self.creator_branch(url, &cached_path, file).await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::Span::current().record("role", "follower");
                    match self.follower_branch(&cached_path).await? {
                        Some(pinned) => return Ok(pinned),
                        None => {
                            tracing::warn!(url, attempt, "writer crashed mid-fetch, retrying");
                        }
                    }
                }
                Err(e) => return Err(CacheError::IoError(e)),
            }
        }

        Err(CacheError::FetchFailed {
            url: url.to_string(),
            reason: "repeated_failure".to_string(),
        })
    }

    async fn try_create(&self, path: &Path) -> std::io::Result<std::fs::File> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
        })
        .await
        .expect("create_new blocking task panicked")
    }

    async fn creator_branch(
        &self,
        url: &str,
        cached_path: &Path,
        file: std::fs::File,
    ) -> Result<(PathBuf, PinGuard), CacheError> {
        let file = lock_exclusive(file).await?;
        let (outcome, file) = self.populate(url, cached_path, file).await;

        match outcome {
            Ok(resolved_path) => {
                let file = lock_shared(file).await?;
                touch(&file);
                let pin = PinGuard::new(file, resolved_path.clone(), self.cache_root.clone());
                Ok((resolved_path, pin))
            }
            Err(err) => {
                drop(file);
                let _ = std::fs::remove_file(cached_path);
                Err(err)
            }
        }
    }

    /// Dispatches to the right source reader and writes into `file`.
    /// Always hands `file` back so the caller can lock/unlink/downgrade it
    /// regardless of outcome.
    async fn populate(
        &self,
        url: &str,
        cached_path: &Path,
        file: std::fs::File,
    ) -> (Result<PathBuf, CacheError>, std::fs::File) {
        match split_scheme(url) {
            Some(("http" | "https", _)) => {
                let mut sink = tokio::fs::File::from_std(file);
                let write_result = RemoteReader::new(self.client.clone())
                    .fetch_into(url, &mut sink, self.timeout, self.max_file_size, self.bind_ip)
                    .await;
                let file = sink.into_std().await;
                let result = match write_result {
                    Ok(()) => self
                        .check_mime(url, cached_path)
                        .await
                        .map(|()| cached_path.to_path_buf()),
                    Err(e) => Err(e),
                };
                (result, file)
            }
            Some((disk_name, object_path)) => match self.disks.get(disk_name) {
                None => (
                    Err(CacheError::UnknownDisk {
                        name: disk_name.to_string(),
                    }),
                    file,
                ),
                Some(disk) if disk.kind() == DiskKind::Local => {
                    // No bytes are copied into the cache for a local-mount
                    // disk: unlink the placeholder now and resolve the
                    // real path, keeping this descriptor (and its lock)
                    // open for the remainder of the protocol.
                    let _ = std::fs::remove_file(cached_path);
                    let result = local::resolve(disk.as_ref(), object_path).await;
                    (result, file)
                }
                Some(_) => {
                    let mut sink = tokio::fs::File::from_std(file);
                    let write_result = DiskReader::new(self.disks.as_ref())
                        .fetch_into(disk_name, object_path, &mut sink, self.timeout, self.max_file_size)
                        .await;
                    let file = sink.into_std().await;
                    let result = match write_result {
                        Ok(()) => self
                            .check_mime(url, cached_path)
                            .await
                            .map(|()| cached_path.to_path_buf()),
                        Err(e) => Err(e),
                    };
                    (result, file)
                }
            },
            None => (
                Err(CacheError::FetchFailed {
                    url: url.to_string(),
                    reason: "url has no scheme".to_string(),
                }),
                file,
            ),
        }
    }

    async fn check_mime(&self, url: &str, path: &Path) -> Result<(), CacheError> {
        let Some(allowed) = &self.mime_types else {
            return Ok(());
        };
        let probe_path = path.to_path_buf();
        let detected = tokio::task::spawn_blocking(move || infer::get_from_path(&probe_path))
            .await
            .expect("mime-sniffing blocking task panicked")?;
        match detected {
            Some(kind) if allowed.iter().any(|m| m == kind.mime_type()) => Ok(()),
            Some(kind) => Err(CacheError::DisallowedMime {
                url: url.to_string(),
                mime: kind.mime_type().to_string(),
            }),
            None => Err(CacheError::DisallowedMime {
                url: url.to_string(),
                mime: "unknown".to_string(),
            }),
        }
    }

    /// Returns `Ok(None)` when the writer crashed (`nlink == 0`) and the
    /// caller should restart `retrieve`.
    async fn follower_branch(
        &self,
        cached_path: &Path,
    ) -> Result<Option<(PathBuf, PinGuard)>, CacheError> {
        let path = cached_path.to_path_buf();
        let opened = tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new().read(true).open(&path)
        })
        .await
        .expect("open blocking task panicked");

        let file = match opened {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::IoError(e)),
        };

        let file = lock_shared(file).await?;

        let nlink = file.metadata()?.nlink();
        if nlink == 0 {
            drop(file);
            return Ok(None);
        }

        touch(&file);
        let resolved_path = cached_path.to_path_buf();
        let pin = PinGuard::new(file, resolved_path.clone(), self.cache_root.clone());
        Ok(Some((resolved_path, pin)))
    }
}
