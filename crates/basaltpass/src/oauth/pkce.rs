// PKCE (RFC 7636) challenge verification.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const METHOD_S256: &str = "S256";
pub const METHOD_PLAIN: &str = "plain";

const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

/// RFC 7636 §4.1 unreserved characters.
pub fn valid_verifier(verifier: &str) -> bool {
    (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Compute the S256 challenge for a verifier.
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Verify a code verifier against the stored challenge.
pub fn verify(challenge: &str, method: &str, verifier: &str) -> bool {
    if !valid_verifier(verifier) {
        return false;
    }
    match method {
        METHOD_S256 => {
            let computed = s256_challenge(verifier);
            computed.as_bytes().ct_eq(challenge.as_bytes()).into()
        }
        METHOD_PLAIN => verifier.as_bytes().ct_eq(challenge.as_bytes()).into(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 appendix B.
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_rfc7636_vector() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
        assert!(verify(CHALLENGE, METHOD_S256, VERIFIER));
    }

    #[test]
    fn test_wrong_verifier_rejected() {
        assert!(!verify(CHALLENGE, METHOD_S256, &"a".repeat(43)));
    }

    #[test]
    fn test_plain_method() {
        let v = "plain-verifier-plain-verifier-plain-verifier-xx";
        assert!(verify(v, METHOD_PLAIN, v));
        assert!(!verify("other", METHOD_PLAIN, v));
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert!(!valid_verifier(&"a".repeat(42)));
        assert!(valid_verifier(&"a".repeat(43)));
        assert!(valid_verifier(&"a".repeat(128)));
        assert!(!valid_verifier(&"a".repeat(129)));
        assert!(!valid_verifier(&format!("{}!", "a".repeat(43))));
    }

    #[test]
    fn test_unknown_method_rejected() {
        assert!(!verify(CHALLENGE, "S512", VERIFIER));
    }
}
