// The userinfo endpoint. Claims are filtered by the token's scopes.

use serde::Serialize;

use super::error::{OAuthError, OAuthErrorCode};
use super::OAuthService;

#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    pub tenant_id: String,
    pub app_id: String,
}

impl OAuthService {
    /// Handle `GET /oauth/userinfo` with a bearer access token.
    pub async fn userinfo(&self, token: &str) -> Result<UserInfo, OAuthError> {
        let invalid = || OAuthError::new(OAuthErrorCode::InvalidToken, "invalid access token");
        let access = self.authenticate_bearer(token).await?;
        let user_id = access.user_id.as_deref().ok_or_else(|| {
            OAuthError::new(
                OAuthErrorCode::InvalidToken,
                "token has no user subject",
            )
        })?;
        let user = self
            .ctx
            .store
            .get_user(user_id)
            .await?
            .filter(|u| !u.deleted && !u.banned)
            .ok_or_else(invalid)?;

        let has = |scope: &str| access.scopes.iter().any(|s| s == scope);
        if !has("openid") && !has("profile") {
            return Err(OAuthError::new(
                OAuthErrorCode::InvalidToken,
                "token lacks an identity scope",
            ));
        }
        self.touch_last_active(&access.app_id, user_id).await;
        Ok(UserInfo {
            sub: user.id,
            name: has("profile").then(|| user.nickname.clone()),
            picture: if has("profile") { user.avatar_url } else { None },
            email: has("email").then(|| user.email.clone()),
            email_verified: has("email").then_some(user.email_verified),
            tenant_id: access.tenant_id,
            app_id: access.app_id,
        })
    }

    /// Best-effort activity stamp on the app-user row.
    async fn touch_last_active(&self, app_id: &str, user_id: &str) {
        let Ok(Some(mut app_user)) = self.ctx.store.get_app_user(app_id, user_id).await else {
            return;
        };
        app_user.last_active_at = Some(chrono::Utc::now());
        let _ = self.ctx.store.upsert_app_user(app_user).await;
    }
}
