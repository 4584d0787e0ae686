// External collaborator interfaces.
//
// Verifiers and senders are injected through the context; the default
// wiring uses the real implementations from `basaltpass::crypto` and a
// logging message sender.

use async_trait::async_trait;

use crate::error::Result;

/// Verifies a TOTP code against a stored secret.
pub trait TotpVerifier: Send + Sync {
    /// `true` when `code` is valid for `secret` within the accepted
    /// time-step window.
    fn verify(&self, secret: &str, code: &str) -> bool;
}

/// Verifies a passkey assertion produced by an external authenticator.
/// The control plane treats the assertion as opaque bytes.
pub trait PasskeyVerifier: Send + Sync {
    fn verify(&self, credential_id: &str, assertion: &[u8]) -> bool;
}

/// Delivers verification codes out of band.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()>;
    async fn send_sms(&self, to: &str, body: &str) -> Result<()>;
}

/// Rejects every TOTP code. Default until a real verifier is wired in.
pub struct RejectAllTotp;

impl TotpVerifier for RejectAllTotp {
    fn verify(&self, _secret: &str, _code: &str) -> bool {
        false
    }
}

/// Rejects every passkey assertion.
pub struct RejectAllPasskeys;

impl PasskeyVerifier for RejectAllPasskeys {
    fn verify(&self, _credential_id: &str, _assertion: &[u8]) -> bool {
        false
    }
}

/// Logs outbound messages instead of delivering them. Suitable for
/// development and tests only.
pub struct LogMessageSender;

#[async_trait]
impl MessageSender for LogMessageSender {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        tracing::info!(target: "basaltpass::mail", to, subject, "email queued");
        Ok(())
    }

    async fn send_sms(&self, to: &str, _body: &str) -> Result<()> {
        tracing::info!(target: "basaltpass::sms", to, "sms queued");
        Ok(())
    }
}
