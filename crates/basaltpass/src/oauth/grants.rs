// The token endpoint: authorization_code, refresh_token, and
// client_credentials grants.
//
// Code redemption and refresh rotation go through the store's compound
// operations, so two racing requests over the same grant resolve to one
// winner; the loser surfaces as `invalid_grant`.

use chrono::Utc;
use serde::Serialize;

use basaltpass_core::audit::{action, AuditRecord};
use basaltpass_core::id::generate_id;
use basaltpass_core::model::{
    parse_scope, AccessToken, AppUser, AppUserStatus, GrantType, OAuthClient,
};

use super::error::{OAuthError, OAuthErrorCode};
use super::{pkce, OAuthService};
use crate::crypto::random;

#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

impl OAuthService {
    /// Handle `POST /oauth/token`.
    pub async fn token(&self, req: TokenRequest) -> Result<TokenResponse, OAuthError> {
        let grant = match req.grant_type.as_str() {
            "authorization_code" => GrantType::AuthorizationCode,
            "refresh_token" => GrantType::RefreshToken,
            "client_credentials" => GrantType::ClientCredentials,
            _ => {
                return Err(OAuthError::new(
                    OAuthErrorCode::UnsupportedGrantType,
                    "unsupported grant_type",
                ))
            }
        };

        let client = self
            .authenticate_client(&req.client_id, req.client_secret.as_deref())
            .await?;
        if !client.allows_grant(grant) {
            return Err(OAuthError::new(
                OAuthErrorCode::UnauthorizedClient,
                "client is not allowed to use this grant",
            ));
        }

        let response = match grant {
            GrantType::AuthorizationCode => self.authorization_code_grant(&client, &req).await?,
            GrantType::RefreshToken => self.refresh_token_grant(&client, &req).await?,
            GrantType::ClientCredentials => self.client_credentials_grant(&client, &req).await?,
        };

        // Bookkeeping that must not affect the response.
        let mut touched = client;
        touched.last_used_at = Some(Utc::now());
        touched.updated_at = Utc::now();
        let _ = self.ctx.store.update_client(touched).await;

        Ok(response)
    }

    async fn authorization_code_grant(
        &self,
        client: &OAuthClient,
        req: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let code_value = req
            .code
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("code is required"))?;
        let code = self
            .ctx
            .store
            .get_auth_code(code_value)
            .await?
            .ok_or_else(|| OAuthError::invalid_grant("unknown authorization code"))?;

        let now = Utc::now();
        if code.used {
            return Err(OAuthError::invalid_grant("authorization code already used"));
        }
        if code.is_expired(now) {
            return Err(OAuthError::invalid_grant("authorization code expired"));
        }
        if code.client_id != client.client_id {
            return Err(OAuthError::invalid_grant(
                "authorization code was issued to another client",
            ));
        }
        match req.redirect_uri.as_deref() {
            Some(uri) if uri == code.redirect_uri => {}
            _ => {
                return Err(OAuthError::invalid_grant(
                    "redirect_uri does not match the authorization request",
                ))
            }
        }
        // A public client authenticates by possession of the verifier;
        // a code without a PKCE binding is unredeemable for it.
        if client.is_public && code.code_challenge.is_none() {
            return Err(OAuthError::invalid_grant(
                "authorization code has no PKCE binding",
            ));
        }
        if let Some(challenge) = &code.code_challenge {
            let method = code.code_challenge_method.as_deref().unwrap_or(pkce::METHOD_PLAIN);
            let verifier = req
                .code_verifier
                .as_deref()
                .ok_or_else(|| OAuthError::invalid_grant("code_verifier is required"))?;
            if !pkce::verify(challenge, method, verifier) {
                return Err(OAuthError::invalid_grant("code_verifier does not match"));
            }
        }

        let (tenant, app) = self.active_chain(client).await?;
        self.check_token_quota(&tenant).await?;

        let (access, refresh) =
            self.mint_pair(client, &tenant.id, &app.id, &code.user_id, code.scopes.clone());
        let response = Self::response(&access, Some(&refresh.token));
        self.ctx
            .store
            .redeem_auth_code(code_value, access, refresh)
            .await?;

        self.touch_app_user(&app.id, &code.user_id, &code.scopes).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::TOKEN_ISSUED)
                    .actor(&code.user_id)
                    .tenant(&tenant.id)
                    .subject(&client.client_id),
            )
            .await;
        Ok(response)
    }

    async fn refresh_token_grant(
        &self,
        client: &OAuthClient,
        req: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let token_value = req
            .refresh_token
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("refresh_token is required"))?;
        let stored = self
            .ctx
            .store
            .get_refresh_token(token_value)
            .await?
            .ok_or_else(|| OAuthError::invalid_grant("unknown refresh token"))?;
        if stored.is_expired(Utc::now()) {
            return Err(OAuthError::invalid_grant("refresh token expired"));
        }
        if stored.client_id != client.client_id {
            return Err(OAuthError::invalid_grant(
                "refresh token was issued to another client",
            ));
        }

        // Scope narrowing is allowed on refresh, widening is not.
        let scopes = match req.scope.as_deref() {
            None | Some("") => stored.scopes.clone(),
            Some(scope) => {
                let requested = parse_scope(scope);
                if !requested.iter().all(|s| stored.scopes.contains(s)) {
                    return Err(OAuthError::invalid_scope());
                }
                requested
            }
        };

        let (tenant, app) = self.active_chain(client).await?;
        self.check_token_quota(&tenant).await?;

        let (access, refresh) =
            self.mint_pair(client, &tenant.id, &app.id, &stored.user_id, scopes);
        let response = Self::response(&access, Some(&refresh.token));
        self.ctx
            .store
            .rotate_refresh_token(token_value, access, refresh)
            .await?;

        self.ctx
            .audit
            .record(
                AuditRecord::new(action::TOKEN_REFRESHED)
                    .actor(&stored.user_id)
                    .tenant(&tenant.id)
                    .subject(&client.client_id),
            )
            .await;
        Ok(response)
    }

    /// Machine-to-machine tokens: no user, no refresh token.
    async fn client_credentials_grant(
        &self,
        client: &OAuthClient,
        req: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let scopes = match req.scope.as_deref() {
            None | Some("") => client.scopes.clone(),
            Some(scope) => {
                let requested = parse_scope(scope);
                if !client.scopes_contained(&requested) {
                    return Err(OAuthError::invalid_scope());
                }
                requested
            }
        };
        let (tenant, app) = self.active_chain(client).await?;
        self.check_token_quota(&tenant).await?;

        let now = Utc::now();
        let access = AccessToken {
            id: generate_id(),
            token: random::access_token(),
            client_id: client.client_id.clone(),
            user_id: None,
            tenant_id: tenant.id.clone(),
            app_id: app.id,
            scopes,
            expires_at: now
                + chrono::Duration::seconds(self.ctx.options.access_token_ttl_secs),
            created_at: now,
        };
        let response = Self::response(&access, None);
        self.ctx.store.create_access_token(access).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::TOKEN_ISSUED)
                    .tenant(&tenant.id)
                    .subject(&client.client_id),
            )
            .await;
        Ok(response)
    }

    /// Record (or refresh) the user's authorization of the app.
    async fn touch_app_user(
        &self,
        app_id: &str,
        user_id: &str,
        scopes: &[String],
    ) -> Result<(), OAuthError> {
        let now = Utc::now();
        let existing = self.ctx.store.get_app_user(app_id, user_id).await?;
        let app_user = match existing {
            Some(mut au) => {
                au.last_authorized_at = now;
                for s in scopes {
                    if !au.scopes.contains(s) {
                        au.scopes.push(s.clone());
                    }
                }
                au
            }
            None => AppUser {
                id: generate_id(),
                app_id: app_id.to_string(),
                user_id: user_id.to_string(),
                status: AppUserStatus::Active,
                scopes: scopes.to_vec(),
                first_authorized_at: now,
                last_authorized_at: now,
                last_active_at: None,
            },
        };
        self.ctx.store.upsert_app_user(app_user).await?;
        Ok(())
    }

    fn response(access: &AccessToken, refresh: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: access.token.clone(),
            token_type: "Bearer",
            expires_in: (access.expires_at - access.created_at).num_seconds(),
            refresh_token: refresh.map(String::from),
            scope: access.scope_string(),
        }
    }
}
