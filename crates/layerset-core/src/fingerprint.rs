//! Content fingerprints for module change detection

/// BLAKE3 hex digest of `content`.
pub fn compute_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_empty() {
        assert_eq!(
            compute_hash(b""),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn test_compute_hash_tracks_content() {
        assert_eq!(compute_hash(b"module bytes"), compute_hash(b"module bytes"));
        assert_ne!(compute_hash(b"module bytes"), compute_hash(b"other bytes"));
    }
}
