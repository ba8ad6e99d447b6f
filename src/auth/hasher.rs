//! Key hashing and generation.
//!
//! Provisioning and request-time validation both go through
//! [`hash_api_key`], so a stored digest and a presented key always meet on
//! byte-identical input.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::types::KeyHash;

/// Length of a hex-encoded SHA-256 digest.
pub const KEY_HASH_LEN: usize = 64;

/// Number of random bytes behind a generated key.
const KEY_RANDOM_BYTES: usize = 32;

/// Hash an API key for storage and lookup (don't store raw keys).
pub fn hash_api_key(key: &str) -> KeyHash {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let result = hasher.finalize();
    KeyHash::new(format!("{:x}", result))
}

/// Generate a new raw API key: 32 CSPRNG bytes, URL-safe base64.
///
/// The caller shows the result once and persists only its hash.
pub fn generate_api_key() -> String {
    let bytes: [u8; KEY_RANDOM_BYTES] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_api_key_deterministic() {
        let hash1 = hash_api_key("secret123");
        let hash2 = hash_api_key("secret123");
        let hash3 = hash_api_key("different");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn test_hash_api_key_fixed_length_hex() {
        for input in ["", "a", "abc123", &"x".repeat(4096)] {
            let hash = hash_api_key(input);
            assert_eq!(hash.as_str().len(), KEY_HASH_LEN);
            assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
            assert!(!hash.as_str().chars().any(|c| c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_hash_api_key_known_vector() {
        assert_eq!(
            hash_api_key("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_api_key_avalanche() {
        let a = hash_api_key("abc123");
        let b = hash_api_key("abc124");

        let differing = a
            .as_str()
            .chars()
            .zip(b.as_str().chars())
            .filter(|(x, y)| x != y)
            .count();
        assert!(differing > KEY_HASH_LEN / 2);
    }

    #[test]
    fn test_hash_does_not_contain_secret() {
        let hash = hash_api_key("abc123");
        assert!(!hash.as_str().contains("abc123"));
    }

    #[test]
    fn test_generate_api_key() {
        let key1 = generate_api_key();
        let key2 = generate_api_key();

        assert_ne!(key1, key2);
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(key1.len(), 43);
        assert!(
            key1.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }
}
