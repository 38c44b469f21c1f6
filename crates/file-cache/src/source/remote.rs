use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::CacheError;

/// Streams an HTTP(S) URL into a cache-entry file descriptor.
pub(crate) struct RemoteReader {
    client: reqwest::Client,
}

impl RemoteReader {
    pub(crate) fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Percent-encode spaces only; every other character passes through
    /// unaltered.
    fn sanitize(url: &str) -> String {
        url.replace(' ', "%20")
    }

    /// Splits the authority out of an `http(s)://host[:port]/...` URL,
    /// defaulting the port by scheme (443/80) when absent.
    fn host_port(url: &str) -> Option<(String, u16)> {
        let rest = url.split_once("://")?.1;
        let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
        Some(match authority.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                (host.to_string(), port.parse().ok()?)
            }
            _ => {
                let port = if url.starts_with("https://") { 443 } else { 80 };
                (authority.to_string(), port)
            }
        })
    }

    /// A client forced to connect to `bind_ip` for this URL's host while
    /// preserving the original `Host` header, or the shared client when no
    /// override is requested.
    fn client_for(&self, url: &str, bind_ip: Option<IpAddr>) -> Result<reqwest::Client, CacheError> {
        let Some(ip) = bind_ip else {
            return Ok(self.client.clone());
        };
        let (host, port) = Self::host_port(url).ok_or_else(|| CacheError::FetchFailed {
            url: url.to_string(),
            reason: "could not parse host from url for bind-ip override".to_string(),
        })?;
        reqwest::Client::builder()
            .resolve(&host, SocketAddr::new(ip, port))
            .build()
            .map_err(|e| CacheError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    pub(crate) async fn fetch_into(
        &self,
        url: &str,
        sink: &mut tokio::fs::File,
        timeout: Duration,
        max_file_size: Option<u64>,
        bind_ip: Option<IpAddr>,
    ) -> Result<(), CacheError> {
        let sanitized = Self::sanitize(url);
        let client = self.client_for(url, bind_ip)?;
        let fetch_failed = |reason: String| CacheError::FetchFailed {
            url: url.to_string(),
            reason,
        };
        let timed_out = || CacheError::SourceTimeout {
            url: url.to_string(),
        };

        let response = tokio::time::timeout(timeout, client.get(&sanitized).send())
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| fetch_failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch_failed(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = tokio::time::timeout(timeout, stream.next())
            .await
            .map_err(|_| timed_out())?
        {
            let chunk = chunk.map_err(|e| fetch_failed(e.to_string()))?;
            written += chunk.len() as u64;
            if let Some(limit) = max_file_size
                && written >= limit
            {
                return Err(CacheError::FileTooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
            sink.write_all(&chunk).await?;
        }
        sink.flush().await?;
        Ok(())
    }
}
