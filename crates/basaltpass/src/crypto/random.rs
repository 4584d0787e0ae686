// Opaque token generation.
//
// Bearer material is 32 random bytes hex-encoded under a type prefix, so
// tokens are self-describing in logs and support dumps without being
// guessable. Client secrets use a larger alphanumeric alphabet.

use rand::{Rng, RngCore};

pub const ACCESS_TOKEN_PREFIX: &str = "bp_at_";
pub const REFRESH_TOKEN_PREFIX: &str = "bp_rt_";
pub const AUTH_CODE_PREFIX: &str = "bp_ac_";
pub const SESSION_TOKEN_PREFIX: &str = "bp_sess_";

const TOKEN_BYTES: usize = 32;

const SECRET_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                                abcdefghijklmnopqrstuvwxyz\
                                0123456789-_";

fn random_hex() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn access_token() -> String {
    format!("{ACCESS_TOKEN_PREFIX}{}", random_hex())
}

pub fn refresh_token() -> String {
    format!("{REFRESH_TOKEN_PREFIX}{}", random_hex())
}

pub fn auth_code() -> String {
    format!("{AUTH_CODE_PREFIX}{}", random_hex())
}

pub fn session_token() -> String {
    format!("{SESSION_TOKEN_PREFIX}{}", random_hex())
}

/// Random string over a 64-character alphabet, used for client secrets.
pub fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SECRET_CHARSET[rng.gen_range(0..SECRET_CHARSET.len())] as char)
        .collect()
}

/// Six-digit numeric verification code, zero-padded.
pub fn verification_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_and_length() {
        let at = access_token();
        assert!(at.starts_with("bp_at_"));
        assert_eq!(at.len(), "bp_at_".len() + 64);
        assert!(refresh_token().starts_with("bp_rt_"));
        assert!(auth_code().starts_with("bp_ac_"));
        assert!(session_token().starts_with("bp_sess_"));
    }

    #[test]
    fn test_verification_code_is_six_digits() {
        let code = verification_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_random_string_charset() {
        let s = random_string(48);
        assert_eq!(s.len(), 48);
        assert!(s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
