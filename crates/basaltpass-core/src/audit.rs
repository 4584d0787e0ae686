// Audit trail.
//
// Sinks are fire-and-forget: recording must never fail a request, so the
// trait returns nothing and implementations swallow their own errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

// Action names, dotted `subject.verb` form.
pub mod action {
    pub const USER_REGISTERED: &str = "user.registered";
    pub const USER_LOGIN: &str = "user.login";
    pub const USER_LOGIN_FAILED: &str = "user.login_failed";
    pub const USER_LOGOUT: &str = "user.logout";
    pub const USER_BANNED: &str = "user.banned";
    pub const TENANT_CREATED: &str = "tenant.created";
    pub const TENANT_UPDATED: &str = "tenant.updated";
    pub const TENANT_DELETED: &str = "tenant.deleted";
    pub const MEMBER_ADDED: &str = "tenant.member_added";
    pub const MEMBER_REMOVED: &str = "tenant.member_removed";
    pub const OWNERSHIP_TRANSFERRED: &str = "tenant.ownership_transferred";
    pub const APP_CREATED: &str = "app.created";
    pub const APP_DELETED: &str = "app.deleted";
    pub const CLIENT_REGISTERED: &str = "oauth.client.registered";
    pub const CLIENT_SECRET_REGENERATED: &str = "oauth.client.secret_regenerated";
    pub const CODE_ISSUED: &str = "oauth.code.issued";
    pub const TOKEN_ISSUED: &str = "oauth.token.issued";
    pub const TOKEN_REFRESHED: &str = "oauth.token.refreshed";
    pub const TOKEN_REVOKED: &str = "oauth.token.revoked";
    pub const CONSENT_GRANTED: &str = "oauth.consent.granted";
    pub const CONSENT_DENIED: &str = "oauth.consent.denied";
    pub const ROLE_CREATED: &str = "rbac.role.created";
    pub const ROLE_DELETED: &str = "rbac.role.deleted";
    pub const ROLE_ASSIGNED: &str = "rbac.role.assigned";
    pub const ROLE_UNASSIGNED: &str = "rbac.role.unassigned";
}

/// One audit entry. `actor_id` is absent for unauthenticated actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            actor_id: None,
            tenant_id: None,
            subject: None,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn actor(mut self, id: impl Into<String>) -> Self {
        self.actor_id = Some(id.into());
        self
    }

    pub fn tenant(mut self, id: impl Into<String>) -> Self {
        self.tenant_id = Some(id.into());
        self
    }

    pub fn subject(mut self, id: impl Into<String>) -> Self {
        self.subject = Some(id.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Discards everything.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _record: AuditRecord) {}
}

/// Emits each record as a structured `tracing` event at INFO.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "basaltpass::audit",
            action = %record.action,
            actor = record.actor_id.as_deref().unwrap_or("-"),
            tenant = record.tenant_id.as_deref().unwrap_or("-"),
            subject = record.subject.as_deref().unwrap_or("-"),
            detail = record.detail.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

/// Buffers records in memory; used by tests to assert the trail.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemoryAuditSink::new();
        sink.record(
            AuditRecord::new(action::TOKEN_ISSUED)
                .actor("u1")
                .tenant("t1"),
        )
        .await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, action::TOKEN_ISSUED);
        assert_eq!(records[0].actor_id.as_deref(), Some("u1"));
    }
}
