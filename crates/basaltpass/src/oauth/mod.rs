// The authorization server.
//
// Opaque bearer tokens, authorization-code + PKCE, refresh rotation,
// client-credentials, RFC 7662 introspection, and RFC 7009 revocation.
// Every issued token is bound to the (tenant, app) of its client; the
// HTTP layer derives tenancy from the token and never from request
// headers.

mod authorize;
mod discovery;
mod error;
mod grants;
mod introspect;
mod pkce;
mod userinfo;

#[cfg(test)]
mod tests;

pub use authorize::{AuthorizeOutcome, AuthorizeRequest, ConsentDecision};
pub use discovery::{DiscoveryDocument, JwksDocument};
pub use error::{AuthorizeError, OAuthError, OAuthErrorCode};
pub use grants::{TokenRequest, TokenResponse};
pub use introspect::IntrospectionResponse;
pub use userinfo::UserInfo;

use std::sync::Arc;

use chrono::{Duration, Utc};

use basaltpass_core::model::{
    AccessToken, App, AppStatus, AppUserStatus, OAuthClient, RefreshToken, Tenant, TenantStatus,
};

use crate::context::AppContext;
use crate::crypto::{random, secret};

pub struct OAuthService {
    ctx: Arc<AppContext>,
}

impl OAuthService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Look up an active client by id.
    async fn active_client(&self, client_id: &str) -> Result<Option<OAuthClient>, OAuthError> {
        Ok(self
            .ctx
            .store
            .get_client(client_id)
            .await?
            .filter(|c| c.is_active))
    }

    /// Authenticate a client. Confidential clients must present their
    /// secret; public clients carry none, and the grant layer demands a
    /// PKCE binding from them instead.
    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<OAuthClient, OAuthError> {
        let Some(client) = self.active_client(client_id).await? else {
            return Err(OAuthError::invalid_client());
        };
        if client.is_public {
            return Ok(client);
        }
        let Some(provided) = client_secret else {
            return Err(OAuthError::invalid_client());
        };
        if !secret::verify_secret(provided, &client.client_secret_hash) {
            return Err(OAuthError::invalid_client());
        }
        Ok(client)
    }

    /// Resolve the client's app and tenant, requiring both to be active.
    /// Suspended or deleted tenants and apps never issue or validate.
    async fn active_chain(&self, client: &OAuthClient) -> Result<(Tenant, App), OAuthError> {
        let app = self
            .ctx
            .store
            .get_app(&client.app_id)
            .await?
            .filter(|a| a.status == AppStatus::Active)
            .ok_or_else(|| {
                OAuthError::new(OAuthErrorCode::AccessDenied, "app is not active")
            })?;
        let tenant = self
            .ctx
            .store
            .get_tenant(&app.tenant_id)
            .await?
            .filter(|t| t.status == TenantStatus::Active)
            .ok_or_else(|| {
                OAuthError::new(OAuthErrorCode::AccessDenied, "tenant is not active")
            })?;
        Ok((tenant, app))
    }

    /// Enforce the tenant's hourly token quota before minting.
    async fn check_token_quota(&self, tenant: &Tenant) -> Result<(), OAuthError> {
        let since = Utc::now() - Duration::hours(1);
        let issued = self
            .ctx
            .store
            .count_tokens_issued_since(&tenant.id, since)
            .await?;
        if issued >= tenant.quota.max_tokens_per_hour {
            return Err(OAuthError::new(
                OAuthErrorCode::AccessDenied,
                "token quota exceeded",
            ));
        }
        Ok(())
    }

    /// Resolve a bearer access token, requiring the full chain to be
    /// live: token unexpired, issuing client active, tenant active, user
    /// neither banned nor deleted, and the app-user row not banned.
    /// Resource endpoints authenticate through this.
    pub async fn authenticate_bearer(
        &self,
        token: &str,
    ) -> Result<AccessToken, OAuthError> {
        let invalid = || OAuthError::new(OAuthErrorCode::InvalidToken, "invalid access token");
        let access = self
            .ctx
            .store
            .get_access_token(token)
            .await?
            .filter(|t| !t.is_expired(Utc::now()))
            .ok_or_else(invalid)?;
        if self.active_client(&access.client_id).await?.is_none() {
            return Err(invalid());
        }
        self.ctx
            .store
            .get_tenant(&access.tenant_id)
            .await?
            .filter(|t| t.status == TenantStatus::Active)
            .ok_or_else(invalid)?;
        if let Some(user_id) = &access.user_id {
            self.ctx
                .store
                .get_user(user_id)
                .await?
                .filter(|u| !u.deleted && !u.banned)
                .ok_or_else(invalid)?;
            if let Some(app_user) = self.ctx.store.get_app_user(&access.app_id, user_id).await? {
                if app_user.status == AppUserStatus::Banned {
                    return Err(invalid());
                }
            }
        }
        Ok(access)
    }

    /// Build an unsaved access/refresh pair bound to the client chain.
    fn mint_pair(
        &self,
        client: &OAuthClient,
        tenant_id: &str,
        app_id: &str,
        user_id: &str,
        scopes: Vec<String>,
    ) -> (AccessToken, RefreshToken) {
        let now = Utc::now();
        let access = AccessToken {
            id: basaltpass_core::id::generate_id(),
            token: random::access_token(),
            client_id: client.client_id.clone(),
            user_id: Some(user_id.to_string()),
            tenant_id: tenant_id.to_string(),
            app_id: app_id.to_string(),
            scopes: scopes.clone(),
            expires_at: now + Duration::seconds(self.ctx.options.access_token_ttl_secs),
            created_at: now,
        };
        let refresh = RefreshToken {
            id: basaltpass_core::id::generate_id(),
            token: random::refresh_token(),
            client_id: client.client_id.clone(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            app_id: app_id.to_string(),
            scopes,
            access_token_id: Some(access.id.clone()),
            expires_at: now + Duration::seconds(self.ctx.options.refresh_token_ttl_secs),
            created_at: now,
        };
        (access, refresh)
    }
}
