// RFC 7662 introspection and RFC 7009 revocation.
//
// Both endpoints require client authentication. Introspection never
// errors on an unknown token: anything not positively valid is simply
// `active: false`, so the endpoint cannot be used as an oracle.

use chrono::Utc;
use serde::Serialize;

use basaltpass_core::audit::{action, AuditRecord};
use basaltpass_core::model::{AppUserStatus, TenantStatus};

use super::error::OAuthError;
use super::OAuthService;
use crate::crypto::random;

#[derive(Debug, Clone, Serialize, Default)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl IntrospectionResponse {
    fn inactive() -> Self {
        Self::default()
    }
}

impl OAuthService {
    /// Handle `POST /oauth/introspect`.
    pub async fn introspect(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        token: &str,
    ) -> Result<IntrospectionResponse, OAuthError> {
        self.authenticate_client(client_id, client_secret).await?;

        if token.starts_with(random::REFRESH_TOKEN_PREFIX) {
            return self.introspect_refresh(token).await;
        }

        let Some(access) = self.ctx.store.get_access_token(token).await? else {
            return Ok(IntrospectionResponse::inactive());
        };
        if access.is_expired(Utc::now()) {
            return Ok(IntrospectionResponse::inactive());
        }

        // The whole chain has to be live: issuing client active, tenant
        // active, user not banned in the app or globally.
        if self.active_client(&access.client_id).await?.is_none() {
            return Ok(IntrospectionResponse::inactive());
        }
        let tenant_ok = self
            .ctx
            .store
            .get_tenant(&access.tenant_id)
            .await?
            .map(|t| t.status == TenantStatus::Active)
            .unwrap_or(false);
        if !tenant_ok {
            return Ok(IntrospectionResponse::inactive());
        }
        let mut username = None;
        if let Some(user_id) = &access.user_id {
            let user = self
                .ctx
                .store
                .get_user(user_id)
                .await?
                .filter(|u| !u.banned && !u.deleted);
            let Some(user) = user else {
                return Ok(IntrospectionResponse::inactive());
            };
            username = (!user.email.is_empty()).then(|| user.email);
            let app_user = self.ctx.store.get_app_user(&access.app_id, user_id).await?;
            if let Some(au) = app_user {
                if au.status == AppUserStatus::Banned {
                    return Ok(IntrospectionResponse::inactive());
                }
            }
        }

        Ok(IntrospectionResponse {
            active: true,
            scope: Some(access.scope_string()),
            client_id: Some(access.client_id),
            sub: access.user_id,
            username,
            tenant_id: Some(access.tenant_id),
            app_id: Some(access.app_id),
            token_type: Some("Bearer"),
            exp: Some(access.expires_at.timestamp()),
            iat: Some(access.created_at.timestamp()),
        })
    }

    /// Refresh tokens are deleted on rotation, so a rotated token is
    /// simply absent and reports inactive.
    async fn introspect_refresh(&self, token: &str) -> Result<IntrospectionResponse, OAuthError> {
        let Some(refresh) = self.ctx.store.get_refresh_token(token).await? else {
            return Ok(IntrospectionResponse::inactive());
        };
        if refresh.is_expired(Utc::now()) {
            return Ok(IntrospectionResponse::inactive());
        }
        if self.active_client(&refresh.client_id).await?.is_none() {
            return Ok(IntrospectionResponse::inactive());
        }
        let tenant_ok = self
            .ctx
            .store
            .get_tenant(&refresh.tenant_id)
            .await?
            .map(|t| t.status == TenantStatus::Active)
            .unwrap_or(false);
        let user = self
            .ctx
            .store
            .get_user(&refresh.user_id)
            .await?
            .filter(|u| !u.banned && !u.deleted);
        let Some(user) = user else {
            return Ok(IntrospectionResponse::inactive());
        };
        if !tenant_ok {
            return Ok(IntrospectionResponse::inactive());
        }

        Ok(IntrospectionResponse {
            active: true,
            scope: Some(refresh.scopes.join(" ")),
            client_id: Some(refresh.client_id),
            sub: Some(refresh.user_id),
            username: (!user.email.is_empty()).then(|| user.email),
            tenant_id: Some(refresh.tenant_id),
            app_id: Some(refresh.app_id),
            token_type: Some("refresh_token"),
            exp: Some(refresh.expires_at.timestamp()),
            iat: Some(refresh.created_at.timestamp()),
        })
    }

    /// Handle `POST /oauth/revoke`. Per RFC 7009 the endpoint succeeds
    /// even for unknown tokens; revoking a refresh token also drops its
    /// paired access token.
    pub async fn revoke(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        token: &str,
    ) -> Result<(), OAuthError> {
        let client = self.authenticate_client(client_id, client_secret).await?;

        if token.starts_with(random::REFRESH_TOKEN_PREFIX) {
            if let Some(stored) = self.ctx.store.get_refresh_token(token).await? {
                if stored.client_id == client.client_id {
                    self.ctx.store.delete_refresh_token(token).await?;
                    self.audit_revoked(&client.client_id).await;
                }
            }
        } else if let Some(stored) = self.ctx.store.get_access_token(token).await? {
            if stored.client_id == client.client_id {
                self.ctx.store.delete_access_token(token).await?;
                self.audit_revoked(&client.client_id).await;
            }
        }
        Ok(())
    }

    async fn audit_revoked(&self, client_id: &str) {
        self.ctx
            .audit
            .record(AuditRecord::new(action::TOKEN_REVOKED).subject(client_id))
            .await;
    }
}
