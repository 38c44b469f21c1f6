#![doc = include_str!("../README.md")]

mod error;
mod evict;
mod facade;
mod key;
mod lock;
mod logical_file;
mod pin;
mod retrieve;
mod scheme;
mod source;

pub use error::CacheError;
pub use facade::Cache;
pub use file_cache_config::{CacheConfig, CacheConfigOverlay};
pub use file_cache_disks::{Disk, DiskKind, DiskRegistry, InMemoryDiskRegistry, LocalDisk, ObjectDisk};
pub use key::key_for;
pub use logical_file::{LogicalFile, UrlFile};
pub use pin::PinGuard;
