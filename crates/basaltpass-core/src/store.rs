// Typed storage abstraction.
//
// Backends implement `Store` over whatever engine they like; the services
// never see the engine. Lookup methods return `Ok(None)` for absent rows
// and reserve `Err` for backend failure. The two compound operations at
// the bottom are the only places where atomicity across rows is required.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::*;

/// Backend failure surfaced to services.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row the operation requires does not exist.
    #[error("row not found")]
    NotFound,
    /// A uniqueness or single-use guarantee was violated; the message
    /// names the constraint.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The backend is unreachable or failing.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage interface for the control plane.
///
/// Single-row operations need no transactional guarantees beyond their own
/// atomicity. [`Store::redeem_auth_code`] and [`Store::rotate_refresh_token`]
/// must be linearizable: under concurrent redemption of the same code or
/// token, exactly one caller succeeds and the rest get
/// [`StoreError::Conflict`].
#[async_trait]
pub trait Store: Send + Sync {
    // ─── Users ───────────────────────────────────────────────────

    async fn create_user(&self, user: User) -> StoreResult<User>;
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>>;
    /// Case-insensitive email lookup.
    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn get_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>>;
    async fn update_user(&self, user: User) -> StoreResult<User>;
    async fn list_users_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<User>>;

    async fn create_external_identity(
        &self,
        identity: ExternalIdentity,
    ) -> StoreResult<ExternalIdentity>;
    async fn get_external_identity(
        &self,
        provider: &str,
        subject: &str,
    ) -> StoreResult<Option<ExternalIdentity>>;

    // ─── Registration challenges ─────────────────────────────────

    async fn create_pending_signup(&self, signup: PendingSignup) -> StoreResult<PendingSignup>;
    async fn get_pending_signup(&self, id: &str) -> StoreResult<Option<PendingSignup>>;
    async fn delete_pending_signup(&self, id: &str) -> StoreResult<()>;

    async fn create_challenge(
        &self,
        challenge: VerificationChallenge,
    ) -> StoreResult<VerificationChallenge>;
    async fn get_challenge(&self, id: &str) -> StoreResult<Option<VerificationChallenge>>;
    async fn get_challenge_for_signup(
        &self,
        signup_id: &str,
        channel: ChallengeChannel,
    ) -> StoreResult<Option<VerificationChallenge>>;
    async fn update_challenge(
        &self,
        challenge: VerificationChallenge,
    ) -> StoreResult<VerificationChallenge>;
    async fn delete_challenges_for_signup(&self, signup_id: &str) -> StoreResult<()>;

    // ─── Sessions ────────────────────────────────────────────────

    async fn create_session(&self, session: Session) -> StoreResult<Session>;
    async fn get_session_by_token(&self, token: &str) -> StoreResult<Option<Session>>;
    async fn delete_session(&self, id: &str) -> StoreResult<()>;
    async fn delete_sessions_for_user(&self, user_id: &str) -> StoreResult<()>;

    // ─── Tenants ─────────────────────────────────────────────────

    async fn create_tenant(&self, tenant: Tenant) -> StoreResult<Tenant>;
    async fn get_tenant(&self, id: &str) -> StoreResult<Option<Tenant>>;
    async fn get_tenant_by_code(&self, code: &str) -> StoreResult<Option<Tenant>>;
    async fn update_tenant(&self, tenant: Tenant) -> StoreResult<Tenant>;
    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>>;

    async fn create_membership(
        &self,
        membership: TenantMembership,
    ) -> StoreResult<TenantMembership>;
    async fn get_membership(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> StoreResult<Option<TenantMembership>>;
    async fn update_membership(
        &self,
        membership: TenantMembership,
    ) -> StoreResult<TenantMembership>;
    async fn delete_membership(&self, id: &str) -> StoreResult<()>;
    async fn list_memberships_for_tenant(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Vec<TenantMembership>>;
    async fn list_memberships_for_user(&self, user_id: &str)
        -> StoreResult<Vec<TenantMembership>>;

    // ─── Apps ────────────────────────────────────────────────────

    async fn create_app(&self, app: App) -> StoreResult<App>;
    async fn get_app(&self, id: &str) -> StoreResult<Option<App>>;
    async fn update_app(&self, app: App) -> StoreResult<App>;
    async fn list_apps_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<App>>;
    async fn count_apps_by_tenant(&self, tenant_id: &str) -> StoreResult<u32>;

    async fn upsert_app_user(&self, app_user: AppUser) -> StoreResult<AppUser>;
    async fn get_app_user(&self, app_id: &str, user_id: &str) -> StoreResult<Option<AppUser>>;
    async fn list_app_users(&self, app_id: &str) -> StoreResult<Vec<AppUser>>;

    // ─── OAuth clients ───────────────────────────────────────────

    async fn create_client(&self, client: OAuthClient) -> StoreResult<OAuthClient>;
    async fn get_client(&self, client_id: &str) -> StoreResult<Option<OAuthClient>>;
    async fn get_client_for_app(&self, app_id: &str) -> StoreResult<Option<OAuthClient>>;
    async fn update_client(&self, client: OAuthClient) -> StoreResult<OAuthClient>;
    async fn delete_client(&self, client_id: &str) -> StoreResult<()>;

    // ─── Roles & permissions ─────────────────────────────────────

    async fn create_role(&self, role: Role) -> StoreResult<Role>;
    async fn get_role(&self, id: &str) -> StoreResult<Option<Role>>;
    async fn get_role_by_code(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
        code: &str,
    ) -> StoreResult<Option<Role>>;
    async fn update_role(&self, role: Role) -> StoreResult<Role>;
    async fn delete_role(&self, id: &str) -> StoreResult<()>;
    async fn list_roles(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
    ) -> StoreResult<Vec<Role>>;

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission>;
    async fn get_permission_by_code(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
        code: &str,
    ) -> StoreResult<Option<Permission>>;
    async fn list_permissions(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
    ) -> StoreResult<Vec<Permission>>;

    async fn attach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()>;
    async fn detach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()>;
    async fn list_role_permissions(&self, role_id: &str) -> StoreResult<Vec<Permission>>;

    async fn create_binding(&self, binding: RoleBinding) -> StoreResult<RoleBinding>;
    async fn delete_binding(&self, user_id: &str, role_id: &str) -> StoreResult<()>;
    async fn list_bindings_for_user(&self, user_id: &str) -> StoreResult<Vec<RoleBinding>>;
    async fn count_bindings_for_role(&self, role_id: &str) -> StoreResult<u32>;

    // ─── OAuth grants & tokens ───────────────────────────────────

    async fn create_auth_code(&self, code: AuthorizationCode) -> StoreResult<AuthorizationCode>;
    async fn get_auth_code(&self, code: &str) -> StoreResult<Option<AuthorizationCode>>;

    async fn get_access_token(&self, token: &str) -> StoreResult<Option<AccessToken>>;
    async fn create_access_token(&self, token: AccessToken) -> StoreResult<AccessToken>;
    async fn delete_access_token(&self, token: &str) -> StoreResult<()>;
    async fn get_refresh_token(&self, token: &str) -> StoreResult<Option<RefreshToken>>;
    async fn delete_refresh_token(&self, token: &str) -> StoreResult<()>;
    async fn count_tokens_issued_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u32>;
    async fn delete_tokens_for_user(&self, user_id: &str) -> StoreResult<()>;
    async fn delete_tokens_for_client(&self, client_id: &str) -> StoreResult<()>;

    async fn create_pending_authorization(
        &self,
        pending: PendingAuthorization,
    ) -> StoreResult<PendingAuthorization>;
    /// Removes and returns the stash; a second take of the same id yields
    /// `Ok(None)`.
    async fn take_pending_authorization(
        &self,
        id: &str,
    ) -> StoreResult<Option<PendingAuthorization>>;

    async fn upsert_consent(&self, consent: Consent) -> StoreResult<Consent>;
    async fn get_consent(&self, user_id: &str, client_id: &str) -> StoreResult<Option<Consent>>;
    async fn delete_consent(&self, user_id: &str, client_id: &str) -> StoreResult<()>;

    // ─── Compound operations ─────────────────────────────────────

    /// Atomically mark `code` used and persist the freshly minted token
    /// pair. Fails with [`StoreError::Conflict`] if the code is already
    /// used, and with [`StoreError::NotFound`] if it does not exist.
    async fn redeem_auth_code(
        &self,
        code: &str,
        access: AccessToken,
        refresh: RefreshToken,
    ) -> StoreResult<()>;

    /// Atomically invalidate `token` (and its linked access token) and
    /// persist the replacement pair. Same failure contract as
    /// [`Store::redeem_auth_code`].
    async fn rotate_refresh_token(
        &self,
        token: &str,
        access: AccessToken,
        refresh: RefreshToken,
    ) -> StoreResult<()>;
}
