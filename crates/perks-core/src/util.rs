//! Shared utility functions used across multiple modules.

use sha2::{Digest, Sha256};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SHA-256 content hash, hex encoded.
///
/// Used to fingerprint attachment raw bytes so optimized copies can be
/// verified against the source they were derived from.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Stable storage key for an account identifier.
///
/// The per-account store filename is derived from this key so that account
/// identifiers (emails, external ids) never leak into the filesystem.
pub fn store_key(account_id: &str) -> String {
    content_hash(account_id.trim().to_lowercase().as_bytes())
        .chars()
        .take(16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash(b"perks"), content_hash(b"perks"));
        assert_ne!(content_hash(b"perks"), content_hash(b"sprocket"));
        assert_eq!(content_hash(b"perks").len(), 64);
    }

    #[test]
    fn store_key_is_case_insensitive() {
        assert_eq!(store_key("Customer@nsp.com"), store_key("customer@nsp.com"));
        assert_eq!(store_key("customer@nsp.com").len(), 16);
        assert_ne!(store_key("a@nsp.com"), store_key("b@nsp.com"));
    }
}
