use thiserror::Error;

/// Every way a cache operation can fail.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unknown disk {name:?}")]
    UnknownDisk { name: String },

    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("{url} exceeds the {limit}-byte size limit")]
    FileTooLarge { url: String, limit: u64 },

    #[error("timed out retrieving {url}")]
    SourceTimeout { url: String },

    #[error("{url} has disallowed mime type {mime:?}")]
    DisallowedMime { url: String, mime: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
