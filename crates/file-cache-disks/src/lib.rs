#![doc = include_str!("../README.md")]
//!
//! A "disk" is a named backend that a URL's non-HTTP scheme resolves
//! against, e.g. `s3-assets://reports/q3.pdf` resolves through the disk
//! named `s3-assets`. This crate only models the shape the cache needs
//! ([`Disk`] and [`DiskRegistry`]); a real deployment's disk registry
//! (with driver configuration, credentials, retry policy, ...) is an
//! external collaborator that implements these traits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Which family of backend a disk belongs to.
///
/// `Local` disks are referenced in place and never copied into a cache;
/// everything else streams bytes through the cache like a remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskKind {
    Local,
    Object,
}

/// A single named storage backend.
#[async_trait]
pub trait Disk: Send + Sync {
    fn kind(&self) -> DiskKind;

    async fn exists(&self, object_path: &str) -> std::io::Result<bool>;

    /// Size in bytes, when cheaply known without reading the whole object.
    async fn size(&self, object_path: &str) -> std::io::Result<Option<u64>>;

    /// MIME type, when cheaply known without reading the whole object.
    async fn mime_type(&self, object_path: &str) -> std::io::Result<Option<String>>;

    async fn open_read_stream(
        &self,
        object_path: &str,
    ) -> std::io::Result<Box<dyn AsyncRead + Unpin + Send>>;

    /// The local filesystem prefix this disk resolves objects under.
    /// Only meaningful for [`DiskKind::Local`] disks.
    fn path_prefix(&self) -> Option<&Path> {
        None
    }
}

/// Looks up disks by name.
pub trait DiskRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Disk>>;
}

/// An in-memory registry of named disks, for composing a [`DiskRegistry`]
/// without a database or config file backing it.
#[derive(Default, Clone)]
pub struct InMemoryDiskRegistry {
    disks: HashMap<String, Arc<dyn Disk>>,
}

impl InMemoryDiskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, disk: Arc<dyn Disk>) -> &mut Self {
        self.disks.insert(name.into(), disk);
        self
    }
}

impl DiskRegistry for InMemoryDiskRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Disk>> {
        self.disks.get(name).cloned()
    }
}

/// A disk backed by a directory on the local filesystem. Objects are
/// referenced in place; the cache never copies their bytes.
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Disk for LocalDisk {
    fn kind(&self) -> DiskKind {
        DiskKind::Local
    }

    async fn exists(&self, object_path: &str) -> std::io::Result<bool> {
        Ok(tokio::fs::try_exists(self.root.join(object_path)).await?)
    }

    async fn size(&self, object_path: &str) -> std::io::Result<Option<u64>> {
        match tokio::fs::metadata(self.root.join(object_path)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn mime_type(&self, _object_path: &str) -> std::io::Result<Option<String>> {
        Ok(None)
    }

    async fn open_read_stream(
        &self,
        object_path: &str,
    ) -> std::io::Result<Box<dyn AsyncRead + Unpin + Send>> {
        let file = tokio::fs::File::open(self.root.join(object_path)).await?;
        Ok(Box::new(file))
    }

    fn path_prefix(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// A disk backed by an HTTP-addressable object-storage endpoint (the
/// general "non-local" case: S3-compatible stores, blob endpoints, etc.,
/// all of which the cache treats identically — a named prefix plus an
/// HTTP GET/HEAD per object).
pub struct ObjectDisk {
    base_url: String,
    client: reqwest::Client,
}

impl ObjectDisk {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, object_path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), object_path)
    }
}

#[async_trait]
impl Disk for ObjectDisk {
    fn kind(&self) -> DiskKind {
        DiskKind::Object
    }

    async fn exists(&self, object_path: &str) -> std::io::Result<bool> {
        let resp = self
            .client
            .head(self.object_url(object_path))
            .send()
            .await
            .map_err(std::io::Error::other)?;
        Ok(resp.status().is_success())
    }

    async fn size(&self, object_path: &str) -> std::io::Result<Option<u64>> {
        let resp = self
            .client
            .head(self.object_url(object_path))
            .send()
            .await
            .map_err(std::io::Error::other)?;
        Ok(resp.content_length())
    }

    async fn mime_type(&self, object_path: &str) -> std::io::Result<Option<String>> {
        let resp = self
            .client
            .head(self.object_url(object_path))
            .send()
            .await
            .map_err(std::io::Error::other)?;
        Ok(resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from))
    }

    async fn open_read_stream(
        &self,
        object_path: &str,
    ) -> std::io::Result<Box<dyn AsyncRead + Unpin + Send>> {
        let resp = self
            .client
            .get(self.object_url(object_path))
            .send()
            .await
            .map_err(std::io::Error::other)?
            .error_for_status()
            .map_err(std::io::Error::other)?;
        let stream = futures_util::StreamExt::map(resp.bytes_stream(), |r| {
            r.map_err(std::io::Error::other)
        });
        Ok(Box::new(tokio_util::io::StreamReader::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_disk_exists_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"hello").await.unwrap();
        let disk = LocalDisk::new(dir.path());
        assert!(disk.exists("a.txt").await.unwrap());
        assert!(!disk.exists("missing.txt").await.unwrap());
        assert_eq!(disk.size("a.txt").await.unwrap(), Some(5));
        assert_eq!(disk.path_prefix(), Some(dir.path()));
    }

    #[tokio::test]
    async fn registry_looks_up_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = InMemoryDiskRegistry::new();
        registry.register("local", Arc::new(LocalDisk::new(dir.path())));
        assert!(registry.get("local").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn object_disk_head_reports_existence() {
        let server = httpmock::MockServer::start();
        let m = server.mock(|when, then| {
            when.method(httpmock::Method::HEAD).path("/bucket/file.bin");
            then.status(200).header("content-length", "42");
        });
        let disk = ObjectDisk::new(format!("{}/bucket", server.base_url()));
        assert!(disk.exists("file.bin").await.unwrap());
        assert_eq!(disk.size("file.bin").await.unwrap(), Some(42));
        m.assert_hits(2);
    }
}
