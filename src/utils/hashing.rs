//! Hashing helpers for cache keys and provider identities

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a string
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short (16 hex chars) SHA-256 prefix, for filename components
pub fn sha256_short(input: &str) -> String {
    let mut hash = sha256_hex(input);
    hash.truncate(16);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_distinct() {
        assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
        assert_ne!(sha256_hex("abc"), sha256_hex("abd"));
        assert_eq!(sha256_short("abc").len(), 16);
        assert!(sha256_hex("abc").starts_with(&sha256_short("abc")));
    }
}
