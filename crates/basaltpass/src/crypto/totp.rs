// RFC 6238 TOTP verification over HMAC-SHA1, 30-second steps, six
// digits, with a one-step skew window either side.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use basaltpass_core::collab::TotpVerifier;

type HmacSha1 = Hmac<Sha1>;

const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;
const SKEW_STEPS: i64 = 1;

fn hotp(secret: &[u8], counter: u64) -> u32 {
    let mut mac = HmacSha1::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = (digest[19] & 0x0f) as usize;
    let code = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    code % 10u32.pow(DIGITS)
}

fn decode_base32(secret: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut bits: u64 = 0;
    let mut bit_count = 0;
    let mut out = Vec::new();
    for c in secret.bytes() {
        if c == b'=' || c == b' ' {
            continue;
        }
        let v = ALPHABET.iter().position(|&a| a == c.to_ascii_uppercase())? as u64;
        bits = (bits << 5) | v;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
        }
    }
    Some(out)
}

/// Verifier backed by the system clock.
#[derive(Default)]
pub struct HmacTotpVerifier;

impl HmacTotpVerifier {
    fn verify_at(&self, secret: &str, code: &str, unix_secs: u64) -> bool {
        if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        let Some(key) = decode_base32(secret) else {
            return false;
        };
        if key.is_empty() {
            return false;
        }
        let step = (unix_secs / STEP_SECS) as i64;
        for skew in -SKEW_STEPS..=SKEW_STEPS {
            let counter = step + skew;
            if counter < 0 {
                continue;
            }
            let expected = format!("{:06}", hotp(&key, counter as u64));
            if expected.as_bytes().ct_eq(code.as_bytes()).into() {
                return true;
            }
        }
        false
    }
}

impl TotpVerifier for HmacTotpVerifier {
    fn verify(&self, secret: &str, code: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.verify_at(secret, code, now)
    }
}
