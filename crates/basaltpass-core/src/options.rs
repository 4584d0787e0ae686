// Configuration for the control plane.
//
// All durations are seconds. Defaults match the deployed service; embedders
// override individual fields after `BasaltOptions::default()`.

use serde::{Deserialize, Serialize};

/// Password acceptance policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordOptions {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for PasswordOptions {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
        }
    }
}

/// Verification-challenge policy for registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeOptions {
    /// Challenge lifetime in seconds.
    pub ttl_secs: i64,
    /// Wrong-code attempts before the challenge locks.
    pub max_attempts: u32,
    /// Base resend backoff; doubles per send, capped by `resend_cap_secs`.
    pub resend_base_secs: i64,
    pub resend_cap_secs: i64,
    /// Lock duration after attempts are exhausted.
    pub lock_secs: i64,
}

impl Default for ChallengeOptions {
    fn default() -> Self {
        Self {
            ttl_secs: 900,
            max_attempts: 5,
            resend_base_secs: 60,
            resend_cap_secs: 900,
            lock_secs: 900,
        }
    }
}

/// Top-level options shared by all services through the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasaltOptions {
    /// Absolute issuer URL published in discovery, no trailing slash.
    pub issuer: String,
    /// Access-token lifetime.
    pub access_token_ttl_secs: i64,
    /// Refresh-token lifetime.
    pub refresh_token_ttl_secs: i64,
    /// Authorization-code lifetime.
    pub auth_code_ttl_secs: i64,
    /// Interactive session lifetime.
    pub session_ttl_secs: i64,
    /// Pending-consent stash lifetime.
    pub pending_authorization_ttl_secs: i64,
    /// Reject public-client authorize requests without PKCE.
    pub require_pkce_for_public: bool,
    /// Accept the `plain` code-challenge method.
    pub allow_plain_pkce: bool,
    /// Scopes the server understands, published in discovery.
    pub supported_scopes: Vec<String>,
    pub password: PasswordOptions,
    pub challenge: ChallengeOptions,
}

impl Default for BasaltOptions {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".into(),
            access_token_ttl_secs: 3_600,
            refresh_token_ttl_secs: 2_592_000,
            auth_code_ttl_secs: 600,
            session_ttl_secs: 604_800,
            pending_authorization_ttl_secs: 600,
            require_pkce_for_public: true,
            allow_plain_pkce: true,
            supported_scopes: vec![
                "openid".into(),
                "profile".into(),
                "email".into(),
                "offline_access".into(),
            ],
            password: PasswordOptions::default(),
            challenge: ChallengeOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = BasaltOptions::default();
        assert_eq!(opts.access_token_ttl_secs, 3_600);
        assert_eq!(opts.refresh_token_ttl_secs, 2_592_000);
        assert_eq!(opts.auth_code_ttl_secs, 600);
        assert!(opts.require_pkce_for_public);
    }
}
