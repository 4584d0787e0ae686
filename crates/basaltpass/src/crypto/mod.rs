// Cryptographic helpers: password hashing, client-secret hashing,
// token generation, and TOTP verification.

pub mod password;
pub mod random;
pub mod secret;
pub mod totp;
