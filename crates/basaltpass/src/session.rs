// Interactive session validation and teardown.

use std::sync::Arc;

use chrono::Utc;

use basaltpass_core::audit::{action, AuditRecord};
use basaltpass_core::error::{ApiError, ErrorCode, Result};
use basaltpass_core::model::{Session, User};

use crate::context::AppContext;

pub struct SessionService {
    ctx: Arc<AppContext>,
}

impl SessionService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Resolve a session token to its session and user. Expired sessions
    /// are deleted on sight.
    pub async fn check(&self, token: &str) -> Result<(Session, User)> {
        let session = self
            .ctx
            .store
            .get_session_by_token(token)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::InvalidToken))?;
        if session.is_expired(Utc::now()) {
            self.ctx.store.delete_session(&session.id).await?;
            return Err(ApiError::new(ErrorCode::SessionExpired).into());
        }
        let user = self
            .ctx
            .store
            .get_user(&session.user_id)
            .await?
            .filter(|u| !u.deleted && !u.banned)
            .ok_or_else(|| ApiError::new(ErrorCode::InvalidToken))?;
        Ok((session, user))
    }

    /// End a session. Unknown tokens succeed silently so logout is
    /// idempotent.
    pub async fn end(&self, token: &str) -> Result<()> {
        if let Some(session) = self.ctx.store.get_session_by_token(token).await? {
            self.ctx.store.delete_session(&session.id).await?;
            self.ctx
                .audit
                .record(AuditRecord::new(action::USER_LOGOUT).actor(&session.user_id))
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basaltpass_core::id::generate_id;
    use basaltpass_core::options::BasaltOptions;
    use basaltpass_memory::MemoryStore;
    use chrono::Duration;

    async fn seeded() -> (SessionService, Session) {
        let ctx = AppContext::new(BasaltOptions::default(), Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let user = User {
            id: generate_id(),
            email: "s@example.com".into(),
            phone: None,
            password_hash: None,
            totp_secret: None,
            two_factor_enabled: false,
            email_verified: true,
            phone_verified: false,
            banned: false,
            nickname: "s".into(),
            avatar_url: None,
            primary_tenant_id: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        let user = ctx.store.create_user(user).await.unwrap();
        let session = ctx
            .store
            .create_session(Session {
                id: generate_id(),
                token: crate::crypto::random::session_token(),
                user_id: user.id,
                ip: None,
                user_agent: None,
                expires_at: now + Duration::hours(1),
                created_at: now,
            })
            .await
            .unwrap();
        (SessionService::new(ctx), session)
    }

    #[tokio::test]
    async fn test_check_valid_session() {
        let (svc, session) = seeded().await;
        let (found, user) = svc.check(&session.token).await.unwrap();
        assert_eq!(found.id, session.id);
        assert_eq!(user.email, "s@example.com");
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let (svc, session) = seeded().await;
        svc.end(&session.token).await.unwrap();
        svc.end(&session.token).await.unwrap();
        assert!(svc.check(&session.token).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let (svc, _) = seeded().await;
        assert!(svc.check("bp_sess_deadbeef").await.is_err());
    }
}
