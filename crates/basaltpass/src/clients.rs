// Apps and OAuth client registration.
//
// Each app carries at most one client. The plaintext secret exists only
// in the registration (or regeneration) response; storage holds a salted
// hash.

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use basaltpass_core::audit::{action, AuditRecord};
use basaltpass_core::error::{ApiError, ErrorCode, Result};
use basaltpass_core::id::{generate_id, prefixed_id};
use basaltpass_core::model::{App, AppStatus, GrantType, OAuthClient, Tenant};

use crate::context::AppContext;
use crate::crypto::{random, secret};

const CLIENT_SECRET_LEN: usize = 48;

#[derive(Debug, Clone)]
pub struct RegisterClientInput {
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub grant_types: Vec<GrantType>,
    pub allowed_origins: Vec<String>,
    /// Public clients get no secret and must use PKCE.
    pub public: bool,
}

pub struct ClientService {
    ctx: Arc<AppContext>,
}

impl ClientService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    // ─── Apps ────────────────────────────────────────────────────

    /// Create an app under a tenant, enforcing the plan's app quota.
    pub async fn create_app(
        &self,
        actor_id: &str,
        tenant_id: &str,
        name: String,
        description: String,
    ) -> Result<App> {
        let tenant = self.active_tenant(tenant_id).await?;
        let count = self.ctx.store.count_apps_by_tenant(tenant_id).await?;
        if count >= tenant.quota.max_apps {
            return Err(ApiError::new(ErrorCode::AppQuotaExceeded).into());
        }
        let now = Utc::now();
        let app = self
            .ctx
            .store
            .create_app(App {
                id: generate_id(),
                tenant_id: tenant_id.to_string(),
                name,
                description,
                status: AppStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::APP_CREATED)
                    .actor(actor_id)
                    .tenant(tenant_id)
                    .subject(&app.id),
            )
            .await;
        Ok(app)
    }

    pub async fn get_app(&self, id: &str) -> Result<App> {
        self.ctx
            .store
            .get_app(id)
            .await?
            .filter(|a| a.status != AppStatus::Deleted)
            .ok_or_else(|| ApiError::new(ErrorCode::AppNotFound).into())
    }

    /// Soft-delete an app. Its client (if any) is deactivated and every
    /// outstanding token for that client is revoked.
    pub async fn delete_app(&self, actor_id: &str, id: &str) -> Result<()> {
        let mut app = self.get_app(id).await?;
        app.status = AppStatus::Deleted;
        app.updated_at = Utc::now();
        let app = self.ctx.store.update_app(app).await?;

        if let Some(mut client) = self.ctx.store.get_client_for_app(&app.id).await? {
            client.is_active = false;
            client.updated_at = Utc::now();
            let client_id = client.client_id.clone();
            self.ctx.store.update_client(client).await?;
            self.ctx.store.delete_tokens_for_client(&client_id).await?;
        }
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::APP_DELETED)
                    .actor(actor_id)
                    .tenant(&app.tenant_id)
                    .subject(id),
            )
            .await;
        Ok(())
    }

    pub async fn list_apps(&self, tenant_id: &str) -> Result<Vec<App>> {
        Ok(self
            .ctx
            .store
            .list_apps_by_tenant(tenant_id)
            .await?
            .into_iter()
            .filter(|a| a.status != AppStatus::Deleted)
            .collect())
    }

    // ─── OAuth clients ───────────────────────────────────────────

    /// Register the client for an app. For confidential clients the
    /// returned plaintext secret appears exactly once; public clients
    /// have none.
    pub async fn register_client(
        &self,
        actor_id: &str,
        app_id: &str,
        input: RegisterClientInput,
    ) -> Result<(OAuthClient, Option<String>)> {
        let app = self.get_app(app_id).await?;
        self.active_tenant(&app.tenant_id).await?;
        if self.ctx.store.get_client_for_app(app_id).await?.is_some() {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "app already has a client",
            )
            .into());
        }
        Self::validate_redirect_uris(&input.redirect_uris)?;
        if input.grant_types.is_empty() {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "at least one grant type is required",
            )
            .into());
        }
        if input.public && input.grant_types.contains(&GrantType::ClientCredentials) {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "public clients cannot use client_credentials",
            )
            .into());
        }

        let plaintext = (!input.public).then(|| random::random_string(CLIENT_SECRET_LEN));
        let now = Utc::now();
        let client = OAuthClient {
            id: generate_id(),
            app_id: app_id.to_string(),
            client_id: prefixed_id("bp_cli"),
            client_secret_hash: plaintext
                .as_deref()
                .map(secret::hash_secret)
                .unwrap_or_default(),
            redirect_uris: input.redirect_uris,
            scopes: input.scopes,
            grant_types: input.grant_types,
            allowed_origins: input.allowed_origins,
            is_public: input.public,
            is_active: true,
            created_by: actor_id.to_string(),
            last_used_at: None,
            rotates_at: None,
            created_at: now,
            updated_at: now,
        };
        let client = self.ctx.store.create_client(client).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::CLIENT_REGISTERED)
                    .actor(actor_id)
                    .tenant(&app.tenant_id)
                    .subject(&client.client_id),
            )
            .await;
        Ok((client, plaintext))
    }

    /// Mint a replacement secret. Outstanding tokens survive; only new
    /// client authentications need the new value.
    pub async fn regenerate_secret(
        &self,
        actor_id: &str,
        client_id: &str,
    ) -> Result<(OAuthClient, String)> {
        let mut client = self
            .ctx
            .store
            .get_client(client_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::ClientNotFound))?;
        if client.is_public {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "public clients have no secret",
            )
            .into());
        }
        let plaintext = random::random_string(CLIENT_SECRET_LEN);
        client.client_secret_hash = secret::hash_secret(&plaintext);
        client.rotates_at = Some(Utc::now());
        client.updated_at = Utc::now();
        let client = self.ctx.store.update_client(client).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::CLIENT_SECRET_REGENERATED)
                    .actor(actor_id)
                    .subject(client_id),
            )
            .await;
        Ok((client, plaintext))
    }

    /// Update client policy fields.
    pub async fn update_client(
        &self,
        client_id: &str,
        redirect_uris: Option<Vec<String>>,
        scopes: Option<Vec<String>>,
        allowed_origins: Option<Vec<String>>,
        is_active: Option<bool>,
    ) -> Result<OAuthClient> {
        let mut client = self
            .ctx
            .store
            .get_client(client_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::ClientNotFound))?;
        if let Some(uris) = redirect_uris {
            Self::validate_redirect_uris(&uris)?;
            client.redirect_uris = uris;
        }
        if let Some(scopes) = scopes {
            client.scopes = scopes;
        }
        if let Some(origins) = allowed_origins {
            client.allowed_origins = origins;
        }
        if let Some(active) = is_active {
            client.is_active = active;
        }
        client.updated_at = Utc::now();
        Ok(self.ctx.store.update_client(client).await?)
    }

    /// Remove a client and revoke everything it issued.
    pub async fn delete_client(&self, client_id: &str) -> Result<()> {
        self.ctx
            .store
            .get_client(client_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::ClientNotFound))?;
        self.ctx.store.delete_tokens_for_client(client_id).await?;
        self.ctx.store.delete_client(client_id).await?;
        Ok(())
    }

    fn validate_redirect_uris(uris: &[String]) -> Result<()> {
        if uris.is_empty() {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "at least one redirect URI is required",
            )
            .into());
        }
        for uri in uris {
            let parsed = Url::parse(uri).map_err(|_| {
                ApiError::with_message(ErrorCode::InvalidRequest, format!("invalid URI: {uri}"))
            })?;
            if parsed.scheme() != "https" && parsed.scheme() != "http" {
                return Err(ApiError::with_message(
                    ErrorCode::InvalidRequest,
                    format!("unsupported scheme in {uri}"),
                )
                .into());
            }
            if parsed.fragment().is_some() {
                return Err(ApiError::with_message(
                    ErrorCode::InvalidRequest,
                    format!("fragment not allowed in {uri}"),
                )
                .into());
            }
        }
        Ok(())
    }

    async fn active_tenant(&self, tenant_id: &str) -> Result<Tenant> {
        let tenant = self
            .ctx
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::TenantNotFound))?;
        if !tenant.is_active() {
            return Err(ApiError::new(ErrorCode::TenantNotActive).into());
        }
        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenants::{CreateTenantInput, TenantService};
    use basaltpass_core::model::{TenantPlan, User};
    use basaltpass_core::options::BasaltOptions;
    use basaltpass_memory::MemoryStore;

    async fn setup() -> (Arc<AppContext>, ClientService, String, String) {
        let ctx = AppContext::new(BasaltOptions::default(), Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let user = ctx
            .store
            .create_user(User {
                id: generate_id(),
                email: "owner@acme.test".into(),
                phone: None,
                password_hash: None,
                totp_secret: None,
                two_factor_enabled: false,
                email_verified: true,
                phone_verified: false,
                banned: false,
                nickname: "owner".into(),
                avatar_url: None,
                primary_tenant_id: None,
                deleted: false,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let tenant = TenantService::new(ctx.clone())
            .create(
                &user.id,
                CreateTenantInput {
                    name: "Acme".into(),
                    code: "acme".into(),
                    description: String::new(),
                    plan: TenantPlan::Free,
                },
            )
            .await
            .unwrap();
        (ctx.clone(), ClientService::new(ctx), tenant.id, user.id)
    }

    fn client_input() -> RegisterClientInput {
        RegisterClientInput {
            redirect_uris: vec!["https://app.acme.test/cb".into()],
            scopes: vec!["openid".into(), "profile".into()],
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            allowed_origins: vec![],
            public: false,
        }
    }

    #[tokio::test]
    async fn test_app_quota_enforced() {
        let (_, svc, tenant_id, user_id) = setup().await;
        for i in 0..3 {
            svc.create_app(&user_id, &tenant_id, format!("app{i}"), String::new())
                .await
                .unwrap();
        }
        let err = svc
            .create_app(&user_id, &tenant_id, "app3".into(), String::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota"));
    }

    #[tokio::test]
    async fn test_register_client_returns_secret_once() {
        let (ctx, svc, tenant_id, user_id) = setup().await;
        let app = svc
            .create_app(&user_id, &tenant_id, "app".into(), String::new())
            .await
            .unwrap();
        let (client, plaintext) = svc
            .register_client(&user_id, &app.id, client_input())
            .await
            .unwrap();
        let plaintext = plaintext.unwrap();
        assert!(client.client_id.starts_with("bp_cli_"));
        assert_eq!(plaintext.len(), CLIENT_SECRET_LEN);

        let stored = ctx
            .store
            .get_client(&client.client_id)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stored.client_secret_hash, plaintext);
        assert!(secret::verify_secret(&plaintext, &stored.client_secret_hash));
    }

    #[tokio::test]
    async fn test_one_client_per_app() {
        let (_, svc, tenant_id, user_id) = setup().await;
        let app = svc
            .create_app(&user_id, &tenant_id, "app".into(), String::new())
            .await
            .unwrap();
        svc.register_client(&user_id, &app.id, client_input())
            .await
            .unwrap();
        let err = svc
            .register_client(&user_id, &app.id, client_input())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already has a client"));
    }

    #[tokio::test]
    async fn test_bad_redirect_uri_rejected() {
        let (_, svc, tenant_id, user_id) = setup().await;
        let app = svc
            .create_app(&user_id, &tenant_id, "app".into(), String::new())
            .await
            .unwrap();
        let mut input = client_input();
        input.redirect_uris = vec!["https://app.acme.test/cb#frag".into()];
        assert!(svc.register_client(&user_id, &app.id, input).await.is_err());
    }

    #[tokio::test]
    async fn test_regenerate_secret_invalidates_old() {
        let (ctx, svc, tenant_id, user_id) = setup().await;
        let app = svc
            .create_app(&user_id, &tenant_id, "app".into(), String::new())
            .await
            .unwrap();
        let (client, old_secret) = svc
            .register_client(&user_id, &app.id, client_input())
            .await
            .unwrap();
        let old_secret = old_secret.unwrap();
        let (_, new_secret) = svc
            .regenerate_secret(&user_id, &client.client_id)
            .await
            .unwrap();

        let stored = ctx
            .store
            .get_client(&client.client_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!secret::verify_secret(&old_secret, &stored.client_secret_hash));
        assert!(secret::verify_secret(&new_secret, &stored.client_secret_hash));
        assert!(stored.rotates_at.is_some());
    }

    #[tokio::test]
    async fn test_public_client_has_no_secret() {
        let (_, svc, tenant_id, user_id) = setup().await;
        let app = svc
            .create_app(&user_id, &tenant_id, "mobile".into(), String::new())
            .await
            .unwrap();
        let mut input = client_input();
        input.public = true;
        let (client, plaintext) = svc
            .register_client(&user_id, &app.id, input)
            .await
            .unwrap();
        assert!(client.is_public);
        assert!(plaintext.is_none());
        assert!(client.client_secret_hash.is_empty());

        let err = svc
            .regenerate_secret(&user_id, &client.client_id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no secret"));
    }

    #[tokio::test]
    async fn test_public_client_cannot_use_client_credentials() {
        let (_, svc, tenant_id, user_id) = setup().await;
        let app = svc
            .create_app(&user_id, &tenant_id, "mobile".into(), String::new())
            .await
            .unwrap();
        let mut input = client_input();
        input.public = true;
        input.grant_types.push(GrantType::ClientCredentials);
        let err = svc
            .register_client(&user_id, &app.id, input)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("client_credentials"));
    }
}
