//! Content hashing for compare-and-swap writes

/// Opaque version token of a record's on-disk bytes.
///
/// Two reads yield equal versions iff the file content was byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordVersion(String);

impl RecordVersion {
    /// Compute the version of raw file content.
    pub fn of(content: &[u8]) -> Self {
        Self(compute_hash(content))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Compute BLAKE3 hash of content, hex-encoded
pub fn compute_hash(content: &[u8]) -> String {
    let hash = blake3::hash(content);
    hash.to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_empty() {
        let hash = compute_hash(b"");
        // BLAKE3 of empty string is deterministic
        assert_eq!(
            hash,
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn test_version_tracks_content() {
        let a = RecordVersion::of(br#"{"hub_pid":1}"#);
        let b = RecordVersion::of(br#"{"hub_pid":1}"#);
        let c = RecordVersion::of(br#"{"hub_pid":2}"#);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }
}
