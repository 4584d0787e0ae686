// Client-secret hashing.
//
// Secrets are high-entropy random strings, so salted SHA-256 is enough;
// the salt prevents cross-row comparison. Stored as `hexsalt:hexhash`.

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;

fn digest(salt: &[u8], secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

/// Hash a client secret for storage.
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{}:{}", hex::encode(salt), hex::encode(digest(&salt, secret)))
}

/// Constant-time verification against the stored `hexsalt:hexhash` form.
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let Some((salt_hex, hash_hex)) = stored.split_once(':') else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
        return false;
    };
    digest(&salt, secret).ct_eq(expected.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let stored = hash_secret("cs_live_abc123");
        assert!(verify_secret("cs_live_abc123", &stored));
        assert!(!verify_secret("cs_live_abc124", &stored));
    }

    #[test]
    fn test_malformed_stored_value() {
        assert!(!verify_secret("anything", "garbage"));
    }
}
