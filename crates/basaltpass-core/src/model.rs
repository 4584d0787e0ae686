// Domain model.
//
// Every row belongs to exactly one tenant or to the platform (`tenant_id`
// absent). Soft deletion is a status transition plus filter predicates in
// the services; the store never cascades on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Users ───────────────────────────────────────────────────────

/// Identity principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Primary email, unique case-insensitively.
    pub email: String,
    /// Optional phone, unique exactly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Salted scrypt verifier (`salt:key`, hex). Never serialized.
    #[serde(skip)]
    pub password_hash: Option<String>,
    /// TOTP secret. Never serialized.
    #[serde(skip)]
    pub totp_secret: Option<String>,
    pub two_factor_enabled: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub banned: bool,
    pub nickname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Primary tenant; `None` means the platform itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_tenant_id: Option<String>,
    /// Tombstone flag; tombstoned users are invisible to lookups.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether the user can sign in interactively at all.
    /// `two_factor_enabled` implies a TOTP secret is present.
    pub fn can_sign_in(&self) -> bool {
        !self.deleted && !self.banned && self.password_hash.is_some()
    }
}

/// Link to an already-verified external subject (federated sign-in).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: String,
    pub provider: String,
    pub subject: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

// ─── Registration challenges ─────────────────────────────────────

/// A signup awaiting contact verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSignup {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Delivery channel for a verification code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeChannel {
    Email,
    Phone,
}

/// Per-channel verification challenge with attempt and resend counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationChallenge {
    pub id: String,
    pub signup_id: String,
    pub channel: ChallengeChannel,
    /// Salted hash of the code (`salt:hash`, hex). Never serialized.
    #[serde(skip)]
    pub code_hash: String,
    pub attempts: u32,
    pub sends: u32,
    pub next_send_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl VerificationChallenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|t| t > now).unwrap_or(false)
    }
}

// ─── Sessions ────────────────────────────────────────────────────

/// Internal interactive session minted after first-party login.
/// Distinct from OAuth access tokens; carries no app binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub token: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

// ─── Tenants ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantPlan {
    Free,
    Pro,
    Enterprise,
}

/// Resource limits allocated per plan at tenant creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantQuota {
    pub max_apps: u32,
    pub max_users: u32,
    pub max_tokens_per_hour: u32,
}

impl TenantQuota {
    pub fn for_plan(plan: TenantPlan) -> Self {
        match plan {
            TenantPlan::Free => Self {
                max_apps: 3,
                max_users: 100,
                max_tokens_per_hour: 1_000,
            },
            TenantPlan::Pro => Self {
                max_apps: 20,
                max_users: 10_000,
                max_tokens_per_hour: 50_000,
            },
            TenantPlan::Enterprise => Self {
                max_apps: 100,
                max_users: 1_000_000,
                max_tokens_per_hour: 1_000_000,
            },
        }
    }
}

/// Isolation boundary owning apps and roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// Globally unique, immutable after creation.
    pub code: String,
    pub description: String,
    pub status: TenantStatus,
    pub plan: TenantPlan,
    /// Opaque at this boundary; parsed on read, validated on write.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub quota: TenantQuota,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Owner,
    Admin,
    Member,
}

/// (User, Tenant) membership with a tenant role.
/// Every active tenant has exactly one owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantMembership {
    pub id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub role: TenantRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Apps ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Active,
    Suspended,
    Deleted,
}

/// OAuth-protected application owned by a tenant. `tenant_id` is fixed
/// for the lifetime of the app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: String,
    pub status: AppStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl App {
    pub fn is_active(&self) -> bool {
        self.status == AppStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppUserStatus {
    Active,
    Banned,
    Suspended,
    Restricted,
}

/// Per-app authorization record, upserted at every successful token
/// exchange for the app. Ban status is consulted at token validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppUser {
    pub id: String,
    pub app_id: String,
    pub user_id: String,
    pub status: AppUserStatus,
    pub scopes: Vec<String>,
    pub first_authorized_at: DateTime<Utc>,
    pub last_authorized_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
}

// ─── OAuth clients ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

/// Credentials and policy bound to an app. The plaintext secret is
/// returned once at registration and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub id: String,
    pub app_id: String,
    pub client_id: String,
    /// Salted SHA-256 hash (`salt:hash`, hex). Never serialized.
    #[serde(skip)]
    pub client_secret_hash: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub grant_types: Vec<GrantType>,
    pub allowed_origins: Vec<String>,
    /// Public clients (native or browser apps) hold no secret; their
    /// grants are PKCE-bound instead.
    pub is_public: bool,
    pub is_active: bool,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotates_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthClient {
    /// Strict allowlist match: exact, case-sensitive, no substring logic.
    pub fn validate_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    /// Requested scopes must be a subset (after trimming) of the
    /// client's allowed scopes.
    pub fn scopes_contained(&self, requested: &[String]) -> bool {
        requested
            .iter()
            .all(|s| self.scopes.iter().any(|a| a == s.trim()))
    }
}

// ─── Roles & permissions ─────────────────────────────────────────

/// The three role scopes of the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleScope {
    Global,
    Tenant(String),
    App(String, String),
}

/// Role at one of three scopes: global (no tenant), tenant, or app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// Unique within its scope, immutable after creation.
    pub code: String,
    pub name: String,
    pub description: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn scope(&self) -> RoleScope {
        match (&self.tenant_id, &self.app_id) {
            (Some(t), Some(a)) => RoleScope::App(t.clone(), a.clone()),
            (Some(t), None) => RoleScope::Tenant(t.clone()),
            _ => RoleScope::Global,
        }
    }
}

/// Granular capability string, e.g. `app.read` or `role.assign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub code: String,
    pub category: String,
}

/// (subject, role) binding; scope is the bound role's scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBinding {
    pub id: String,
    pub user_id: String,
    pub role_id: String,
    /// Expired bindings are ignored as if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RoleBinding {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t < now).unwrap_or(false)
    }
}

/// Flat (role, permission) association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: String,
    pub permission_id: String,
}

// ─── OAuth grants & tokens ───────────────────────────────────────

/// Single-use, short-lived exchange token binding a consented authorize
/// request to a later token request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub app_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Opaque bearer access token, bound to (client, user, tenant, app).
/// `user_id` is absent for client-credentials tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: String,
    pub token: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub tenant_id: String,
    pub app_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Single-use refresh token; rotation invalidates it together with its
/// linked access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: String,
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub app_id: String,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// User consent on (client, scopes). Later requests covered by the
/// granted scope set skip the consent prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consent {
    pub id: String,
    pub user_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consent {
    pub fn covers(&self, requested: &[String]) -> bool {
        requested.iter().all(|s| self.scopes.contains(s))
    }
}

/// A validated authorize request stashed while the user decides on
/// consent. Redeemed exactly once by `POST /oauth/consent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub id: String,
    pub client_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub app_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Split a whitespace-separated scope string into trimmed entries.
pub fn parse_scope(scope: &str) -> Vec<String> {
    scope
        .split_whitespace()
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_client() -> OAuthClient {
        let now = Utc::now();
        OAuthClient {
            id: "c1".into(),
            app_id: "app1".into(),
            client_id: "cli_abc".into(),
            client_secret_hash: "salt:hash".into(),
            redirect_uris: vec!["https://app.example/cb".into()],
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            allowed_origins: vec![],
            is_public: false,
            is_active: true,
            created_by: "u1".into(),
            last_used_at: None,
            rotates_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_redirect_uri_exact_match_only() {
        let client = test_client();
        assert!(client.validate_redirect_uri("https://app.example/cb"));
        assert!(!client.validate_redirect_uri("https://app.example/cb/"));
        assert!(!client.validate_redirect_uri("https://app.example/cb?x=1"));
        assert!(!client.validate_redirect_uri("https://APP.EXAMPLE/cb"));
    }

    #[test]
    fn test_scope_containment() {
        let client = test_client();
        assert!(client.scopes_contained(&["openid".into(), "profile".into()]));
        assert!(!client.scopes_contained(&["openid".into(), "wallet".into()]));
        assert!(client.scopes_contained(&[]));
    }

    #[test]
    fn test_role_scope() {
        let now = Utc::now();
        let mut role = Role {
            id: "r1".into(),
            tenant_id: None,
            app_id: None,
            code: "platform_admin".into(),
            name: "Platform Admin".into(),
            description: String::new(),
            is_system: true,
            created_at: now,
        };
        assert_eq!(role.scope(), RoleScope::Global);
        role.tenant_id = Some("t1".into());
        assert_eq!(role.scope(), RoleScope::Tenant("t1".into()));
        role.app_id = Some("a1".into());
        assert_eq!(role.scope(), RoleScope::App("t1".into(), "a1".into()));
    }

    #[test]
    fn test_quota_per_plan() {
        assert_eq!(TenantQuota::for_plan(TenantPlan::Free).max_apps, 3);
        assert_eq!(TenantQuota::for_plan(TenantPlan::Pro).max_apps, 20);
        assert_eq!(TenantQuota::for_plan(TenantPlan::Enterprise).max_apps, 100);
    }

    #[test]
    fn test_binding_expiry() {
        let now = Utc::now();
        let binding = RoleBinding {
            id: "b1".into(),
            user_id: "u1".into(),
            role_id: "r1".into(),
            expires_at: Some(now - Duration::seconds(1)),
            created_at: now - Duration::days(1),
        };
        assert!(binding.is_expired(now));
        let open_ended = RoleBinding {
            expires_at: None,
            ..binding
        };
        assert!(!open_ended.is_expired(now));
    }

    #[test]
    fn test_consent_covers() {
        let now = Utc::now();
        let consent = Consent {
            id: "c1".into(),
            user_id: "u1".into(),
            client_id: "cli_abc".into(),
            scopes: vec!["openid".into(), "profile".into()],
            created_at: now,
            updated_at: now,
        };
        assert!(consent.covers(&["openid".into()]));
        assert!(!consent.covers(&["openid".into(), "email".into()]));
    }

    #[test]
    fn test_parse_scope() {
        assert_eq!(parse_scope("openid  profile "), vec!["openid", "profile"]);
        assert!(parse_scope("").is_empty());
    }

    #[test]
    fn test_secret_hash_never_serialized() {
        let client = test_client();
        let json = serde_json::to_value(&client).unwrap();
        assert!(json.get("client_secret_hash").is_none());
    }
}
