use sha2::{Digest, Sha256};

/// Deterministic cache-entry key for a URL: lowercase hex SHA-256.
///
/// Depends only on the URL — equal URLs always produce equal keys, even
/// across logical files with different identifiers.
pub fn key_for(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(key_for("https://x/a"), key_for("https://x/a"));
    }

    #[test]
    fn distinct_urls_distinct_keys() {
        assert_ne!(key_for("https://x/a"), key_for("https://x/b"));
    }

    #[test]
    fn is_64_hex_chars() {
        let key = key_for("https://x/a");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
