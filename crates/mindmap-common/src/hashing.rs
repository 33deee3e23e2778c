use sha2::{Sha256, Digest};

/// Deterministic 16-character digest of `text`: the first 8 bytes of its
/// SHA-256, hex encoded.
pub fn hash16(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    hash.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash16_deterministic() {
        let h1 = hash16("{\"type\":\"search\"}");
        let h2 = hash16("{\"type\":\"search\"}");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash16_distinguishes_contexts() {
        assert_ne!(hash16("{}"), hash16("{\"limit\":10}"));
    }

    #[test]
    fn test_hash16_known_prefix() {
        // sha256("") = e3b0c44298fc1c14...
        assert_eq!(hash16(""), "e3b0c44298fc1c14");
    }
}
