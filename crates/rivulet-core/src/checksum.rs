//! Content checksums for compiled SQL

use sha2::{Digest, Sha256};

/// sha256 of a text, hex encoded
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(sha256_hex("select 1"), sha256_hex("select 1"));
        assert_ne!(sha256_hex("select 1"), sha256_hex("select 2"));
    }
}
