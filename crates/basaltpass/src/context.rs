// Shared application context.
//
// One `Arc<AppContext>` is built at startup and handed to every service
// and handler. Collaborators default to safe stand-ins and are swapped
// via the builder methods.

use std::sync::Arc;

use basaltpass_core::audit::{AuditSink, TracingAuditSink};
use basaltpass_core::collab::{
    LogMessageSender, MessageSender, PasskeyVerifier, RejectAllPasskeys, TotpVerifier,
};
use basaltpass_core::options::BasaltOptions;
use basaltpass_core::store::Store;

use crate::crypto::totp::HmacTotpVerifier;

pub struct AppContext {
    pub options: BasaltOptions,
    pub store: Arc<dyn Store>,
    pub audit: Arc<dyn AuditSink>,
    pub totp: Arc<dyn TotpVerifier>,
    pub passkeys: Arc<dyn PasskeyVerifier>,
    pub sender: Arc<dyn MessageSender>,
}

impl AppContext {
    pub fn new(options: BasaltOptions, store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self {
            options,
            store,
            audit: Arc::new(TracingAuditSink),
            totp: Arc::new(HmacTotpVerifier::default()),
            passkeys: Arc::new(RejectAllPasskeys),
            sender: Arc::new(LogMessageSender),
        })
    }

    /// Rebuild the context with a different audit sink.
    pub fn with_audit(self: &Arc<Self>, audit: Arc<dyn AuditSink>) -> Arc<Self> {
        Arc::new(Self {
            options: self.options.clone(),
            store: self.store.clone(),
            audit,
            totp: self.totp.clone(),
            passkeys: self.passkeys.clone(),
            sender: self.sender.clone(),
        })
    }

    pub fn with_sender(self: &Arc<Self>, sender: Arc<dyn MessageSender>) -> Arc<Self> {
        Arc::new(Self {
            options: self.options.clone(),
            store: self.store.clone(),
            audit: self.audit.clone(),
            totp: self.totp.clone(),
            passkeys: self.passkeys.clone(),
            sender,
        })
    }
}
