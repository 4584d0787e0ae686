// Password hashing with scrypt.
//
// Stored format is `hexsalt:hexkey`. Parameters follow OWASP guidance:
// N=16384, r=16, p=1, 64-byte key.

use rand::RngCore;
use scrypt::{scrypt, Params};
use subtle::ConstantTimeEq;

use basaltpass_core::error::{BasaltError, Result};

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 64;
const LOG_N: u8 = 14;
const R: u32 = 16;
const P: u32 = 1;

fn params() -> Result<Params> {
    Params::new(LOG_N, R, P, KEY_LEN)
        .map_err(|e| BasaltError::Crypto(format!("invalid scrypt params: {e}")))
}

/// Hash a password into the `hexsalt:hexkey` storage format.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut key = [0u8; KEY_LEN];
    scrypt(password.as_bytes(), &salt, &params()?, &mut key)
        .map_err(|e| BasaltError::Crypto(format!("scrypt failed: {e}")))?;
    Ok(format!("{}:{}", hex::encode(salt), hex::encode(key)))
}

/// Verify a password against a stored hash. Malformed hashes verify as
/// false rather than erroring, so a corrupt row cannot be brute-forced
/// into an oracle.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let Some((salt_hex, key_hex)) = stored.split_once(':') else {
        return Ok(false);
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(key_hex)) else {
        return Ok(false);
    };
    if expected.len() != KEY_LEN {
        return Ok(false);
    }
    let mut key = [0u8; KEY_LEN];
    scrypt(password.as_bytes(), &salt, &params()?, &mut key)
        .map_err(|e| BasaltError::Crypto(format!("scrypt failed: {e}")))?;
    Ok(key.ct_eq(expected.as_slice()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_rejects() {
        assert!(!verify_password("pw", "not-a-hash").unwrap());
        assert!(!verify_password("pw", "abcd:zzzz").unwrap());
    }
}
