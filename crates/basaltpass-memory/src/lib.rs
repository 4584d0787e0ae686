//! In-memory [`Store`] backend.
//!
//! All tables live behind a single async mutex, which makes the compound
//! operations (code redemption, refresh rotation) trivially linearizable.
//! Intended for tests and local development, not production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use basaltpass_core::model::*;
use basaltpass_core::store::{Store, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    external_identities: Vec<ExternalIdentity>,
    pending_signups: Vec<PendingSignup>,
    challenges: Vec<VerificationChallenge>,
    sessions: Vec<Session>,
    tenants: Vec<Tenant>,
    memberships: Vec<TenantMembership>,
    apps: Vec<App>,
    app_users: Vec<AppUser>,
    clients: Vec<OAuthClient>,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
    role_permissions: Vec<RolePermission>,
    bindings: Vec<RoleBinding>,
    auth_codes: Vec<AuthorizationCode>,
    access_tokens: Vec<AccessToken>,
    refresh_tokens: Vec<RefreshToken>,
    pending_authorizations: Vec<PendingAuthorization>,
    consents: Vec<Consent>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_scope(row_tenant: &Option<String>, row_app: &Option<String>, tenant: Option<&str>, app: Option<&str>) -> bool {
    row_tenant.as_deref() == tenant && row_app.as_deref() == app
}

#[async_trait]
impl Store for MemoryStore {
    // ─── Users ───────────────────────────────────────────────────

    async fn create_user(&self, user: User) -> StoreResult<User> {
        let mut inner = self.inner.lock().await;
        if inner
            .users
            .iter()
            .any(|u| !u.deleted && u.email.eq_ignore_ascii_case(&user.email) && !user.email.is_empty())
        {
            return Err(StoreError::Conflict("email already registered".into()));
        }
        if let Some(phone) = &user.phone {
            if inner
                .users
                .iter()
                .any(|u| !u.deleted && u.phone.as_deref() == Some(phone))
            {
                return Err(StoreError::Conflict("phone already registered".into()));
            }
        }
        inner.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .iter()
            .find(|u| !u.deleted && u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .iter()
            .find(|u| !u.deleted && u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn update_user(&self, user: User) -> StoreResult<User> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or(StoreError::NotFound)?;
        *slot = user.clone();
        Ok(user)
    }

    async fn list_users_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<User>> {
        let inner = self.inner.lock().await;
        let member_ids: Vec<&str> = inner
            .memberships
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .map(|m| m.user_id.as_str())
            .collect();
        Ok(inner
            .users
            .iter()
            .filter(|u| !u.deleted && member_ids.contains(&u.id.as_str()))
            .cloned()
            .collect())
    }

    async fn create_external_identity(
        &self,
        identity: ExternalIdentity,
    ) -> StoreResult<ExternalIdentity> {
        let mut inner = self.inner.lock().await;
        if inner
            .external_identities
            .iter()
            .any(|i| i.provider == identity.provider && i.subject == identity.subject)
        {
            return Err(StoreError::Conflict("identity already linked".into()));
        }
        inner.external_identities.push(identity.clone());
        Ok(identity)
    }

    async fn get_external_identity(
        &self,
        provider: &str,
        subject: &str,
    ) -> StoreResult<Option<ExternalIdentity>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .external_identities
            .iter()
            .find(|i| i.provider == provider && i.subject == subject)
            .cloned())
    }

    // ─── Registration challenges ─────────────────────────────────

    async fn create_pending_signup(&self, signup: PendingSignup) -> StoreResult<PendingSignup> {
        let mut inner = self.inner.lock().await;
        inner.pending_signups.push(signup.clone());
        Ok(signup)
    }

    async fn get_pending_signup(&self, id: &str) -> StoreResult<Option<PendingSignup>> {
        let inner = self.inner.lock().await;
        Ok(inner.pending_signups.iter().find(|s| s.id == id).cloned())
    }

    async fn delete_pending_signup(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.pending_signups.retain(|s| s.id != id);
        Ok(())
    }

    async fn create_challenge(
        &self,
        challenge: VerificationChallenge,
    ) -> StoreResult<VerificationChallenge> {
        let mut inner = self.inner.lock().await;
        inner.challenges.push(challenge.clone());
        Ok(challenge)
    }

    async fn get_challenge(&self, id: &str) -> StoreResult<Option<VerificationChallenge>> {
        let inner = self.inner.lock().await;
        Ok(inner.challenges.iter().find(|c| c.id == id).cloned())
    }

    async fn get_challenge_for_signup(
        &self,
        signup_id: &str,
        channel: ChallengeChannel,
    ) -> StoreResult<Option<VerificationChallenge>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .challenges
            .iter()
            .find(|c| c.signup_id == signup_id && c.channel == channel)
            .cloned())
    }

    async fn update_challenge(
        &self,
        challenge: VerificationChallenge,
    ) -> StoreResult<VerificationChallenge> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .challenges
            .iter_mut()
            .find(|c| c.id == challenge.id)
            .ok_or(StoreError::NotFound)?;
        *slot = challenge.clone();
        Ok(challenge)
    }

    async fn delete_challenges_for_signup(&self, signup_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.challenges.retain(|c| c.signup_id != signup_id);
        Ok(())
    }

    // ─── Sessions ────────────────────────────────────────────────

    async fn create_session(&self, session: Session) -> StoreResult<Session> {
        let mut inner = self.inner.lock().await;
        inner.sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session_by_token(&self, token: &str) -> StoreResult<Option<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.iter().find(|s| s.token == token).cloned())
    }

    async fn delete_session(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.retain(|s| s.id != id);
        Ok(())
    }

    async fn delete_sessions_for_user(&self, user_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.retain(|s| s.user_id != user_id);
        Ok(())
    }

    // ─── Tenants ─────────────────────────────────────────────────

    async fn create_tenant(&self, tenant: Tenant) -> StoreResult<Tenant> {
        let mut inner = self.inner.lock().await;
        if inner.tenants.iter().any(|t| t.code == tenant.code) {
            return Err(StoreError::Conflict("tenant code already taken".into()));
        }
        inner.tenants.push(tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, id: &str) -> StoreResult<Option<Tenant>> {
        let inner = self.inner.lock().await;
        Ok(inner.tenants.iter().find(|t| t.id == id).cloned())
    }

    async fn get_tenant_by_code(&self, code: &str) -> StoreResult<Option<Tenant>> {
        let inner = self.inner.lock().await;
        Ok(inner.tenants.iter().find(|t| t.code == code).cloned())
    }

    async fn update_tenant(&self, tenant: Tenant) -> StoreResult<Tenant> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .tenants
            .iter_mut()
            .find(|t| t.id == tenant.id)
            .ok_or(StoreError::NotFound)?;
        *slot = tenant.clone();
        Ok(tenant)
    }

    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>> {
        let inner = self.inner.lock().await;
        Ok(inner.tenants.clone())
    }

    async fn create_membership(
        &self,
        membership: TenantMembership,
    ) -> StoreResult<TenantMembership> {
        let mut inner = self.inner.lock().await;
        if inner
            .memberships
            .iter()
            .any(|m| m.user_id == membership.user_id && m.tenant_id == membership.tenant_id)
        {
            return Err(StoreError::Conflict("membership already exists".into()));
        }
        inner.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn get_membership(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> StoreResult<Option<TenantMembership>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .memberships
            .iter()
            .find(|m| m.user_id == user_id && m.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_membership(
        &self,
        membership: TenantMembership,
    ) -> StoreResult<TenantMembership> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .memberships
            .iter_mut()
            .find(|m| m.id == membership.id)
            .ok_or(StoreError::NotFound)?;
        *slot = membership.clone();
        Ok(membership)
    }

    async fn delete_membership(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.memberships.retain(|m| m.id != id);
        Ok(())
    }

    async fn list_memberships_for_tenant(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Vec<TenantMembership>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .memberships
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_memberships_for_user(
        &self,
        user_id: &str,
    ) -> StoreResult<Vec<TenantMembership>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    // ─── Apps ────────────────────────────────────────────────────

    async fn create_app(&self, app: App) -> StoreResult<App> {
        let mut inner = self.inner.lock().await;
        inner.apps.push(app.clone());
        Ok(app)
    }

    async fn get_app(&self, id: &str) -> StoreResult<Option<App>> {
        let inner = self.inner.lock().await;
        Ok(inner.apps.iter().find(|a| a.id == id).cloned())
    }

    async fn update_app(&self, app: App) -> StoreResult<App> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .apps
            .iter_mut()
            .find(|a| a.id == app.id)
            .ok_or(StoreError::NotFound)?;
        *slot = app.clone();
        Ok(app)
    }

    async fn list_apps_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<App>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .apps
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn count_apps_by_tenant(&self, tenant_id: &str) -> StoreResult<u32> {
        let inner = self.inner.lock().await;
        Ok(inner
            .apps
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.status != AppStatus::Deleted)
            .count() as u32)
    }

    async fn upsert_app_user(&self, app_user: AppUser) -> StoreResult<AppUser> {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner
            .app_users
            .iter_mut()
            .find(|au| au.app_id == app_user.app_id && au.user_id == app_user.user_id)
        {
            *slot = app_user.clone();
        } else {
            inner.app_users.push(app_user.clone());
        }
        Ok(app_user)
    }

    async fn get_app_user(&self, app_id: &str, user_id: &str) -> StoreResult<Option<AppUser>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .app_users
            .iter()
            .find(|au| au.app_id == app_id && au.user_id == user_id)
            .cloned())
    }

    async fn list_app_users(&self, app_id: &str) -> StoreResult<Vec<AppUser>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .app_users
            .iter()
            .filter(|au| au.app_id == app_id)
            .cloned()
            .collect())
    }

    // ─── OAuth clients ───────────────────────────────────────────

    async fn create_client(&self, client: OAuthClient) -> StoreResult<OAuthClient> {
        let mut inner = self.inner.lock().await;
        if inner.clients.iter().any(|c| c.app_id == client.app_id) {
            return Err(StoreError::Conflict("app already has a client".into()));
        }
        inner.clients.push(client.clone());
        Ok(client)
    }

    async fn get_client(&self, client_id: &str) -> StoreResult<Option<OAuthClient>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .clients
            .iter()
            .find(|c| c.client_id == client_id)
            .cloned())
    }

    async fn get_client_for_app(&self, app_id: &str) -> StoreResult<Option<OAuthClient>> {
        let inner = self.inner.lock().await;
        Ok(inner.clients.iter().find(|c| c.app_id == app_id).cloned())
    }

    async fn update_client(&self, client: OAuthClient) -> StoreResult<OAuthClient> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .clients
            .iter_mut()
            .find(|c| c.id == client.id)
            .ok_or(StoreError::NotFound)?;
        *slot = client.clone();
        Ok(client)
    }

    async fn delete_client(&self, client_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.clients.retain(|c| c.client_id != client_id);
        Ok(())
    }

    // ─── Roles & permissions ─────────────────────────────────────

    async fn create_role(&self, role: Role) -> StoreResult<Role> {
        let mut inner = self.inner.lock().await;
        if inner.roles.iter().any(|r| {
            r.code == role.code
                && r.tenant_id == role.tenant_id
                && r.app_id == role.app_id
        }) {
            return Err(StoreError::Conflict("role code already exists".into()));
        }
        inner.roles.push(role.clone());
        Ok(role)
    }

    async fn get_role(&self, id: &str) -> StoreResult<Option<Role>> {
        let inner = self.inner.lock().await;
        Ok(inner.roles.iter().find(|r| r.id == id).cloned())
    }

    async fn get_role_by_code(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
        code: &str,
    ) -> StoreResult<Option<Role>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .roles
            .iter()
            .find(|r| r.code == code && same_scope(&r.tenant_id, &r.app_id, tenant_id, app_id))
            .cloned())
    }

    async fn update_role(&self, role: Role) -> StoreResult<Role> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .roles
            .iter_mut()
            .find(|r| r.id == role.id)
            .ok_or(StoreError::NotFound)?;
        *slot = role.clone();
        Ok(role)
    }

    async fn delete_role(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.roles.retain(|r| r.id != id);
        inner.role_permissions.retain(|rp| rp.role_id != id);
        Ok(())
    }

    async fn list_roles(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
    ) -> StoreResult<Vec<Role>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .roles
            .iter()
            .filter(|r| same_scope(&r.tenant_id, &r.app_id, tenant_id, app_id))
            .cloned()
            .collect())
    }

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
        let mut inner = self.inner.lock().await;
        if inner.permissions.iter().any(|p| {
            p.code == permission.code
                && p.tenant_id == permission.tenant_id
                && p.app_id == permission.app_id
        }) {
            return Err(StoreError::Conflict("permission code already exists".into()));
        }
        inner.permissions.push(permission.clone());
        Ok(permission)
    }

    async fn get_permission_by_code(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
        code: &str,
    ) -> StoreResult<Option<Permission>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .permissions
            .iter()
            .find(|p| p.code == code && same_scope(&p.tenant_id, &p.app_id, tenant_id, app_id))
            .cloned())
    }

    async fn list_permissions(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
    ) -> StoreResult<Vec<Permission>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .permissions
            .iter()
            .filter(|p| same_scope(&p.tenant_id, &p.app_id, tenant_id, app_id))
            .cloned()
            .collect())
    }

    async fn attach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner
            .role_permissions
            .iter()
            .any(|rp| rp.role_id == role_id && rp.permission_id == permission_id)
        {
            inner.role_permissions.push(RolePermission {
                role_id: role_id.to_string(),
                permission_id: permission_id.to_string(),
            });
        }
        Ok(())
    }

    async fn detach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .role_permissions
            .retain(|rp| !(rp.role_id == role_id && rp.permission_id == permission_id));
        Ok(())
    }

    async fn list_role_permissions(&self, role_id: &str) -> StoreResult<Vec<Permission>> {
        let inner = self.inner.lock().await;
        let ids: Vec<&str> = inner
            .role_permissions
            .iter()
            .filter(|rp| rp.role_id == role_id)
            .map(|rp| rp.permission_id.as_str())
            .collect();
        Ok(inner
            .permissions
            .iter()
            .filter(|p| ids.contains(&p.id.as_str()))
            .cloned()
            .collect())
    }

    async fn create_binding(&self, binding: RoleBinding) -> StoreResult<RoleBinding> {
        let mut inner = self.inner.lock().await;
        if inner
            .bindings
            .iter()
            .any(|b| b.user_id == binding.user_id && b.role_id == binding.role_id)
        {
            return Err(StoreError::Conflict("binding already exists".into()));
        }
        inner.bindings.push(binding.clone());
        Ok(binding)
    }

    async fn delete_binding(&self, user_id: &str, role_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .bindings
            .retain(|b| !(b.user_id == user_id && b.role_id == role_id));
        Ok(())
    }

    async fn list_bindings_for_user(&self, user_id: &str) -> StoreResult<Vec<RoleBinding>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .bindings
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn count_bindings_for_role(&self, role_id: &str) -> StoreResult<u32> {
        let inner = self.inner.lock().await;
        Ok(inner.bindings.iter().filter(|b| b.role_id == role_id).count() as u32)
    }

    // ─── OAuth grants & tokens ───────────────────────────────────

    async fn create_auth_code(&self, code: AuthorizationCode) -> StoreResult<AuthorizationCode> {
        let mut inner = self.inner.lock().await;
        inner.auth_codes.push(code.clone());
        Ok(code)
    }

    async fn get_auth_code(&self, code: &str) -> StoreResult<Option<AuthorizationCode>> {
        let inner = self.inner.lock().await;
        Ok(inner.auth_codes.iter().find(|c| c.code == code).cloned())
    }

    async fn get_access_token(&self, token: &str) -> StoreResult<Option<AccessToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .access_tokens
            .iter()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn create_access_token(&self, token: AccessToken) -> StoreResult<AccessToken> {
        let mut inner = self.inner.lock().await;
        inner.access_tokens.push(token.clone());
        Ok(token)
    }

    async fn delete_access_token(&self, token: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.access_tokens.retain(|t| t.token != token);
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> StoreResult<Option<RefreshToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .refresh_tokens
            .iter()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn delete_refresh_token(&self, token: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.refresh_tokens.iter().position(|t| t.token == token) {
            let removed = inner.refresh_tokens.remove(pos);
            if let Some(access_id) = removed.access_token_id {
                inner.access_tokens.retain(|t| t.id != access_id);
            }
        }
        Ok(())
    }

    async fn count_tokens_issued_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u32> {
        let inner = self.inner.lock().await;
        Ok(inner
            .access_tokens
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.created_at >= since)
            .count() as u32)
    }

    async fn delete_tokens_for_user(&self, user_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .access_tokens
            .retain(|t| t.user_id.as_deref() != Some(user_id));
        inner.refresh_tokens.retain(|t| t.user_id != user_id);
        Ok(())
    }

    async fn delete_tokens_for_client(&self, client_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.access_tokens.retain(|t| t.client_id != client_id);
        inner.refresh_tokens.retain(|t| t.client_id != client_id);
        Ok(())
    }

    async fn create_pending_authorization(
        &self,
        pending: PendingAuthorization,
    ) -> StoreResult<PendingAuthorization> {
        let mut inner = self.inner.lock().await;
        inner.pending_authorizations.push(pending.clone());
        Ok(pending)
    }

    async fn take_pending_authorization(
        &self,
        id: &str,
    ) -> StoreResult<Option<PendingAuthorization>> {
        let mut inner = self.inner.lock().await;
        let pos = inner.pending_authorizations.iter().position(|p| p.id == id);
        Ok(pos.map(|pos| inner.pending_authorizations.remove(pos)))
    }

    async fn upsert_consent(&self, consent: Consent) -> StoreResult<Consent> {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner
            .consents
            .iter_mut()
            .find(|c| c.user_id == consent.user_id && c.client_id == consent.client_id)
        {
            slot.scopes = consent.scopes.clone();
            slot.updated_at = consent.updated_at;
            Ok(slot.clone())
        } else {
            inner.consents.push(consent.clone());
            Ok(consent)
        }
    }

    async fn get_consent(&self, user_id: &str, client_id: &str) -> StoreResult<Option<Consent>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .consents
            .iter()
            .find(|c| c.user_id == user_id && c.client_id == client_id)
            .cloned())
    }

    async fn delete_consent(&self, user_id: &str, client_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .consents
            .retain(|c| !(c.user_id == user_id && c.client_id == client_id));
        Ok(())
    }

    // ─── Compound operations ─────────────────────────────────────

    async fn redeem_auth_code(
        &self,
        code: &str,
        access: AccessToken,
        refresh: RefreshToken,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .auth_codes
            .iter_mut()
            .find(|c| c.code == code)
            .ok_or(StoreError::NotFound)?;
        if slot.used {
            return Err(StoreError::Conflict("authorization code already used".into()));
        }
        if slot.is_expired(Utc::now()) {
            return Err(StoreError::Conflict("authorization code expired".into()));
        }
        slot.used = true;
        inner.access_tokens.push(access);
        inner.refresh_tokens.push(refresh);
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        token: &str,
        access: AccessToken,
        refresh: RefreshToken,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(pos) = inner.refresh_tokens.iter().position(|t| t.token == token) else {
            // Already rotated by a concurrent request or never issued.
            return Err(StoreError::Conflict("refresh token is no longer valid".into()));
        };
        let removed = inner.refresh_tokens.remove(pos);
        if let Some(access_id) = removed.access_token_id {
            inner.access_tokens.retain(|t| t.id != access_id);
        }
        inner.access_tokens.push(access);
        inner.refresh_tokens.push(refresh);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn code(value: &str) -> AuthorizationCode {
        let now = Utc::now();
        AuthorizationCode {
            code: value.into(),
            client_id: "cli".into(),
            user_id: "u1".into(),
            tenant_id: "t1".into(),
            app_id: "a1".into(),
            redirect_uri: "https://app.example/cb".into(),
            scopes: vec!["openid".into()],
            code_challenge: None,
            code_challenge_method: None,
            expires_at: now + Duration::minutes(10),
            used: false,
            created_at: now,
        }
    }

    fn pair(n: u32) -> (AccessToken, RefreshToken) {
        let now = Utc::now();
        let access = AccessToken {
            id: format!("at{n}"),
            token: format!("bp_at_{n}"),
            client_id: "cli".into(),
            user_id: Some("u1".into()),
            tenant_id: "t1".into(),
            app_id: "a1".into(),
            scopes: vec!["openid".into()],
            expires_at: now + Duration::hours(1),
            created_at: now,
        };
        let refresh = RefreshToken {
            id: format!("rt{n}"),
            token: format!("bp_rt_{n}"),
            client_id: "cli".into(),
            user_id: "u1".into(),
            tenant_id: "t1".into(),
            app_id: "a1".into(),
            scopes: vec!["openid".into()],
            access_token_id: Some(format!("at{n}")),
            expires_at: now + Duration::days(30),
            created_at: now,
        };
        (access, refresh)
    }

    #[tokio::test]
    async fn test_redeem_is_single_use() {
        let store = MemoryStore::new();
        store.create_auth_code(code("c1")).await.unwrap();
        let (a1, r1) = pair(1);
        store.redeem_auth_code("c1", a1, r1).await.unwrap();
        let (a2, r2) = pair(2);
        let err = store.redeem_auth_code("c1", a2, r2).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_redeem_single_winner() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.create_auth_code(code("c1")).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let (a, r) = pair(n);
                store.redeem_auth_code("c1", a, r).await
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        // Exactly one token pair exists.
        let inner = store.inner.lock().await;
        assert_eq!(inner.access_tokens.len(), 1);
        assert_eq!(inner.refresh_tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_redeem_expired_code_conflicts() {
        let store = MemoryStore::new();
        let mut expired = code("c1");
        expired.expires_at = Utc::now() - Duration::seconds(1);
        store.create_auth_code(expired).await.unwrap();

        let (a, r) = pair(1);
        let err = store.redeem_auth_code("c1", a, r).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let inner = store.inner.lock().await;
        assert!(inner.access_tokens.is_empty());
        assert!(inner.refresh_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_rotation_invalidates_old_pair() {
        let store = MemoryStore::new();
        store.create_auth_code(code("c1")).await.unwrap();
        let (a1, r1) = pair(1);
        let old_refresh = r1.token.clone();
        let old_access = a1.token.clone();
        store.redeem_auth_code("c1", a1, r1).await.unwrap();

        let (a2, r2) = pair(2);
        store
            .rotate_refresh_token(&old_refresh, a2, r2)
            .await
            .unwrap();
        assert!(store.get_refresh_token(&old_refresh).await.unwrap().is_none());
        assert!(store.get_access_token(&old_access).await.unwrap().is_none());
        assert!(store.get_access_token("bp_at_2").await.unwrap().is_some());

        let (a3, r3) = pair(3);
        let err = store
            .rotate_refresh_token(&old_refresh, a3, r3)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_rotation_single_winner() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.create_auth_code(code("c1")).await.unwrap();
        let (a1, r1) = pair(1);
        let refresh = r1.token.clone();
        store.redeem_auth_code("c1", a1, r1).await.unwrap();

        let mut handles = Vec::new();
        for n in 2..18 {
            let store = store.clone();
            let refresh = refresh.clone();
            handles.push(tokio::spawn(async move {
                let (a, r) = pair(n);
                store.rotate_refresh_token(&refresh, a, r).await
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_email_uniqueness_case_insensitive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user = User {
            id: "u1".into(),
            email: "A@Example.com".into(),
            phone: None,
            password_hash: None,
            totp_secret: None,
            two_factor_enabled: false,
            email_verified: false,
            phone_verified: false,
            banned: false,
            nickname: "a".into(),
            avatar_url: None,
            primary_tenant_id: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        store.create_user(user.clone()).await.unwrap();
        let dup = User {
            id: "u2".into(),
            email: "a@example.com".into(),
            ..user
        };
        assert!(matches!(
            store.create_user(dup).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store
            .get_user_by_email("a@EXAMPLE.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_pending_authorization_taken_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .create_pending_authorization(PendingAuthorization {
                id: "p1".into(),
                client_id: "cli".into(),
                user_id: "u1".into(),
                tenant_id: "t1".into(),
                app_id: "a1".into(),
                redirect_uri: "https://app.example/cb".into(),
                scopes: vec![],
                state: None,
                code_challenge: None,
                code_challenge_method: None,
                expires_at: now + Duration::minutes(10),
                created_at: now,
            })
            .await
            .unwrap();
        assert!(store.take_pending_authorization("p1").await.unwrap().is_some());
        assert!(store.take_pending_authorization("p1").await.unwrap().is_none());
    }
}
