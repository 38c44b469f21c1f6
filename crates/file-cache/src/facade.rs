use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use file_cache_config::CacheConfig;
use file_cache_disks::{DiskRegistry, InMemoryDiskRegistry};
use futures_util::StreamExt;
use tokio::io::AsyncRead;

use crate::error::CacheError;
use crate::evict::EvictionEngine;
use crate::key::key_for;
use crate::logical_file::LogicalFile;
use crate::pin::PinGuard;
use crate::retrieve::RetrieveEngine;
use crate::scheme::split_scheme;

/// Entry point for cache consumers: `Get`, `GetOnce`, `Batch`, `BatchOnce`,
/// `GetStream`, `Exists`, `Prune`, `Clear`.
#[derive(Clone)]
pub struct Cache {
    cache_root: PathBuf,
    disks: Arc<dyn DiskRegistry>,
    client: reqwest::Client,
    timeout: Duration,
    max_file_size: Option<u64>,
    max_age: Option<Duration>,
    max_size: Option<u64>,
    mime_types: Option<Vec<String>>,
    bind_ip: Option<IpAddr>,
}

impl Cache {
    /// Construct a cache from configuration and a disk registry. No disks
    /// are configured by default; pass [`InMemoryDiskRegistry::new`]
    /// wrapped in an `Arc` (or your own [`DiskRegistry`] impl) for named
    /// disks, or use [`Cache::without_disks`] for remote-only use.
    pub fn new(config: CacheConfig, disks: Arc<dyn DiskRegistry>) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::default())
            .build()
            .expect("reqwest client construction should not fail with default settings");
        Self {
            cache_root: config.path,
            disks,
            client,
            timeout: config.timeout,
            max_file_size: config.max_file_size,
            max_age: config.max_age,
            max_size: config.max_size,
            mime_types: config.mime_types,
            bind_ip: config.bind_ip,
        }
    }

    /// Construct a cache with no named disks configured (remote URLs only;
    /// any disk-scheme URL fails with `UnknownDisk`).
    pub fn without_disks(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(InMemoryDiskRegistry::new()))
    }

    fn engine(&self) -> RetrieveEngine {
        RetrieveEngine {
            cache_root: self.cache_root.clone(),
            disks: self.disks.clone(),
            client: self.client.clone(),
            timeout: self.timeout,
            max_file_size: self.max_file_size,
            mime_types: self.mime_types.clone(),
            bind_ip: self.bind_ip,
        }
    }

    /// Pin one file, invoke `cb` with its local path, release the pin.
    ///
    /// `cb` takes the path by value (rather than by reference) so its
    /// return type isn't forced into a higher-ranked bound over the
    /// path's borrow — the pin, not the path reference, is what's scoped.
    pub async fn get<F, Fut, T>(&self, file: &dyn LogicalFile, cb: F) -> Result<T, CacheError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = T>,
    {
        let (path, _pin) = self.engine().retrieve(file.url()).await?;
        Ok(cb(path).await)
    }

    /// Like [`Cache::get`], but deletes the entry on release if no other
    /// pin is held at that moment.
    pub async fn get_once<F, Fut, T>(&self, file: &dyn LogicalFile, cb: F) -> Result<T, CacheError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = T>,
    {
        let (path, pin) = self.engine().retrieve(file.url()).await?;
        let value = cb(path).await;
        pin.try_mark_once();
        Ok(value)
    }

    /// Pin every file (in order), invoke `cb` with the resolved paths (same
    /// order as `files`), release all pins on success or failure. If any
    /// file fails to retrieve, pins already acquired are released (in
    /// reverse order) before the error surfaces and the callback never
    /// runs.
    pub async fn batch<F, Fut, T>(
        &self,
        files: &[&dyn LogicalFile],
        cb: F,
    ) -> Result<T, CacheError>
    where
        F: FnOnce(Vec<PathBuf>) -> Fut,
        Fut: Future<Output = T>,
    {
        let (paths, pins) = self.acquire_all(files).await?;
        let value = cb(paths).await;
        release_reverse(pins);
        Ok(value)
    }

    /// `Batch` with per-file delete-on-release semantics.
    pub async fn batch_once<F, Fut, T>(
        &self,
        files: &[&dyn LogicalFile],
        cb: F,
    ) -> Result<T, CacheError>
    where
        F: FnOnce(Vec<PathBuf>) -> Fut,
        Fut: Future<Output = T>,
    {
        let (paths, pins) = self.acquire_all(files).await?;
        let value = cb(paths).await;
        for pin in pins.iter().rev() {
            pin.try_mark_once();
        }
        release_reverse(pins);
        Ok(value)
    }

    async fn acquire_all(
        &self,
        files: &[&dyn LogicalFile],
    ) -> Result<(Vec<PathBuf>, Vec<PinGuard>), CacheError> {
        let mut paths = Vec::with_capacity(files.len());
        let mut pins = Vec::with_capacity(files.len());
        for file in files {
            match self.engine().retrieve(file.url()).await {
                Ok((path, pin)) => {
                    paths.push(path);
                    pins.push(pin);
                }
                Err(err) => {
                    release_reverse(pins);
                    return Err(err);
                }
            }
        }
        Ok((paths, pins))
    }

    /// Non-pinning read stream: if the entry is already cached, a stream
    /// over the local file (touched first); otherwise a stream straight
    /// from the source. Never populates the cache.
    pub async fn get_stream(
        &self,
        file: &dyn LogicalFile,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>, CacheError> {
        let url = file.url();
        let cached_path = self.cache_root.join(key_for(url));

        if tokio::fs::try_exists(&cached_path).await? {
            let handle = tokio::fs::File::open(&cached_path).await?.into_std().await;
            crate::lock::touch(&handle);
            return Ok(Box::new(tokio::fs::File::from_std(handle)));
        }

        match split_scheme(url) {
            Some(("http" | "https", _)) => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| CacheError::FetchFailed {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;
                let stream = response
                    .bytes_stream()
                    .map(|r| r.map_err(std::io::Error::other));
                Ok(Box::new(tokio_util::io::StreamReader::new(stream)))
            }
            Some((disk_name, object_path)) => {
                let disk = self
                    .disks
                    .get(disk_name)
                    .ok_or_else(|| CacheError::UnknownDisk {
                        name: disk_name.to_string(),
                    })?;
                Ok(disk.open_read_stream(object_path).await?)
            }
            None => Err(CacheError::FetchFailed {
                url: url.to_string(),
                reason: "url has no scheme".to_string(),
            }),
        }
    }

    /// Existence probe: does not populate the cache.
    pub async fn exists(&self, file: &dyn LogicalFile) -> Result<bool, CacheError> {
        let url = file.url();
        match split_scheme(url) {
            Some(("http" | "https", _)) => self.probe_remote(url).await,
            Some((disk_name, object_path)) => self.probe_disk(url, disk_name, object_path).await,
            None => Err(CacheError::FetchFailed {
                url: url.to_string(),
                reason: "url has no scheme".to_string(),
            }),
        }
    }

    async fn probe_remote(&self, url: &str) -> Result<bool, CacheError> {
        let Ok(response) = self.client.head(url).send().await else {
            return Ok(false);
        };
        if !response.status().is_success() {
            return Ok(false);
        }
        if let Some(allowed) = &self.mime_types {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            match content_type {
                Some(mime) if allowed.iter().any(|a| a == mime) => {}
                _ => {
                    return Err(CacheError::DisallowedMime {
                        url: url.to_string(),
                        mime: content_type.unwrap_or("unknown").to_string(),
                    });
                }
            }
        }
        if let Some(limit) = self.max_file_size
            && response.content_length().is_some_and(|len| len > limit)
        {
            return Err(CacheError::FileTooLarge {
                url: url.to_string(),
                limit,
            });
        }
        Ok(true)
    }

    async fn probe_disk(
        &self,
        url: &str,
        disk_name: &str,
        object_path: &str,
    ) -> Result<bool, CacheError> {
        let disk = self
            .disks
            .get(disk_name)
            .ok_or_else(|| CacheError::UnknownDisk {
                name: disk_name.to_string(),
            })?;
        if !disk.exists(object_path).await? {
            return Ok(false);
        }
        if let Some(allowed) = &self.mime_types
            && let Some(mime) = disk.mime_type(object_path).await?
            && !allowed.iter().any(|a| a == &mime)
        {
            return Err(CacheError::DisallowedMime {
                url: url.to_string(),
                mime,
            });
        }
        if let Some(limit) = self.max_file_size
            && disk.size(object_path).await?.is_some_and(|size| size > limit)
        {
            return Err(CacheError::FileTooLarge {
                url: url.to_string(),
                limit,
            });
        }
        Ok(true)
    }

    /// Run the age- then size-based eviction pass.
    pub async fn prune(&self) -> Result<(), CacheError> {
        EvictionEngine {
            cache_root: &self.cache_root,
        }
        .prune(self.max_age, self.max_size)
        .await
    }

    /// Delete every safe-deletable entry, ignoring age/size thresholds.
    pub async fn clear(&self) -> Result<(), CacheError> {
        EvictionEngine {
            cache_root: &self.cache_root,
        }
        .clear()
        .await
    }
}

fn release_reverse(mut pins: Vec<PinGuard>) {
    while let Some(pin) = pins.pop() {
        drop(pin);
    }
}
