#![doc = include_str!("../README.md")]

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const CONFIG_FILENAME: &str = "file-cache.toml";

fn default_max_age() -> Option<Duration> {
    Some(Duration::from_secs(60 * 60 * 24 * 7))
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

/// Cache configuration, as described in the configuration surface's field
/// table: `path`, `max_age`, `max_size`, `max_file_size`, `timeout`,
/// `mime_types`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Root directory the cache stores entries under.
    pub path: PathBuf,

    /// Entries older than this (by last-touch time) are eligible for
    /// age-based eviction. `None` disables age-based eviction.
    #[serde(default = "default_max_age", deserialize_with = "deserialize_opt_duration")]
    pub max_age: Option<Duration>,

    /// Soft cap, in bytes, on total cache size. `None` disables size-based
    /// eviction.
    #[serde(default)]
    pub max_size: Option<u64>,

    /// Hard cap, in bytes, on a single retrieved file. Fetches that would
    /// exceed this fail with `FileTooLarge`.
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Per-source-operation timeout (connect + read).
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// Allowlist of MIME types a fetched file must match. `None` disables
    /// the check.
    #[serde(default)]
    pub mime_types: Option<Vec<String>>,

    /// Force remote connections to this IP instead of the URL host's
    /// resolved address, while still sending the original `Host` header.
    /// `None` uses normal DNS resolution.
    #[serde(default)]
    pub bind_ip: Option<IpAddr>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("file-cache"),
            max_age: default_max_age(),
            max_size: None,
            max_file_size: None,
            timeout: default_timeout(),
            mime_types: None,
            bind_ip: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl CacheConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `file-cache.toml` from `dir`, if present; otherwise return
    /// [`CacheConfig::default`].
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let candidate = dir.as_ref().join(CONFIG_FILENAME);
        if candidate.is_file() {
            Self::load(candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply per-instance overrides on top of this configuration. Only
    /// `Some`/non-default fields in `overlay` take effect.
    #[must_use]
    pub fn overlay(mut self, overlay: CacheConfigOverlay) -> Self {
        if let Some(path) = overlay.path {
            self.path = path;
        }
        if let Some(max_age) = overlay.max_age {
            self.max_age = max_age;
        }
        if let Some(max_size) = overlay.max_size {
            self.max_size = max_size;
        }
        if let Some(max_file_size) = overlay.max_file_size {
            self.max_file_size = max_file_size;
        }
        if let Some(timeout) = overlay.timeout {
            self.timeout = timeout;
        }
        if let Some(mime_types) = overlay.mime_types {
            self.mime_types = mime_types;
        }
        if let Some(bind_ip) = overlay.bind_ip {
            self.bind_ip = bind_ip;
        }
        self
    }
}

/// Per-instance overrides layered onto a base [`CacheConfig`] by
/// [`CacheConfig::overlay`]. Every field is optional; `None` leaves the
/// base value untouched, while `Some(None)` (for the `Option`-typed fields)
/// explicitly clears it.
#[derive(Debug, Clone, Default)]
pub struct CacheConfigOverlay {
    pub path: Option<PathBuf>,
    pub max_age: Option<Option<Duration>>,
    pub max_size: Option<Option<u64>>,
    pub max_file_size: Option<Option<u64>>,
    pub timeout: Option<Duration>,
    pub mime_types: Option<Option<Vec<String>>>,
    pub bind_ip: Option<Option<IpAddr>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CacheConfig::default();
        assert!(cfg.max_age.is_some());
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert!(cfg.max_size.is_none());
        assert!(cfg.mime_types.is_none());
        assert!(cfg.bind_ip.is_none());
    }

    #[test]
    fn parses_bind_ip() {
        let toml = r#"
            path = "/var/cache/files"
            bind_ip = "127.0.0.1"
        "#;
        let cfg: CacheConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.bind_ip, Some("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn parses_toml_with_humantime_durations() {
        let toml = r#"
            path = "/var/cache/files"
            max_age = "3d"
            max_size = 1073741824
            max_file_size = 10485760
            timeout = "5s"
            mime_types = ["image/png", "image/jpeg"]
        "#;
        let cfg: CacheConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.path, PathBuf::from("/var/cache/files"));
        assert_eq!(cfg.max_age, Some(Duration::from_secs(3 * 24 * 60 * 60)));
        assert_eq!(cfg.max_size, Some(1_073_741_824));
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(
            cfg.mime_types,
            Some(vec!["image/png".to_string(), "image/jpeg".to_string()])
        );
    }

    #[test]
    fn unknown_field_is_rejected() {
        let toml = r#"
            path = "/var/cache/files"
            bogus = true
        "#;
        assert!(toml::from_str::<CacheConfig>(toml).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CacheConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(cfg.path, CacheConfig::default().path);
    }

    #[test]
    fn overlay_replaces_only_set_fields() {
        let base = CacheConfig::default();
        let overridden = base.clone().overlay(CacheConfigOverlay {
            max_size: Some(Some(42)),
            ..Default::default()
        });
        assert_eq!(overridden.max_size, Some(42));
        assert_eq!(overridden.path, base.path);
        assert_eq!(overridden.timeout, base.timeout);
    }
}
