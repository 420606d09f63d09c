//! Content identity. `checksum` is the sole key used to detect unchanged
//! content across ingestion runs — no normalization, so whitespace-only
//! edits produce a new identity, matching §4.1 exactly.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the UTF-8 bytes of `content`.
pub fn checksum(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(checksum("hello"), checksum("hello"));
    }

    #[test]
    fn checksum_is_sensitive_to_whitespace() {
        assert_ne!(checksum("hello"), checksum("hello "));
    }

    #[test]
    fn checksum_matches_known_vector() {
        // echo -n "abc" | sha256sum
        assert_eq!(
            checksum("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn equal_content_produces_equal_checksum() {
        let a = "fn main() {}\n";
        let b = "fn main() {}\n";
        assert_eq!(checksum(a), checksum(b));
    }
}
