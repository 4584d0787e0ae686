// Route handlers. Thin: parse, delegate to a service, shape the reply.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;

use basaltpass::identity::{IdentityService, LoginInput, RegisterInput};
use basaltpass::oauth::{
    AuthorizeOutcome, AuthorizeRequest, ConsentDecision, OAuthError, OAuthErrorCode,
    OAuthService, TokenRequest,
};
use basaltpass::rbac::{self, RbacService};
use basaltpass::session::SessionService;
use basaltpass::tenants::TenantService;
use basaltpass::AppContext;
use basaltpass_core::error::{ApiError, ErrorCode};
use basaltpass_core::model::{ChallengeChannel, User};

use crate::error::{AuthorizeHttpError, HttpError, OAuthHttpError};
use crate::extract;

async fn session_user(ctx: &Arc<AppContext>, headers: &HeaderMap) -> Result<User, HttpError> {
    let token = extract::bearer(headers)
        .ok_or_else(|| HttpError::from(ApiError::new(ErrorCode::InvalidToken)))?;
    let (_, user) = SessionService::new(ctx.clone()).check(token).await?;
    Ok(user)
}

// ─── Discovery ───────────────────────────────────────────────────

pub async fn discovery(State(ctx): State<Arc<AppContext>>) -> Response {
    Json(OAuthService::new(ctx).discovery()).into_response()
}

pub async fn jwks(State(ctx): State<Arc<AppContext>>) -> Response {
    Json(OAuthService::new(ctx).jwks()).into_response()
}

// ─── Authorize & consent ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

pub async fn authorize(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let user = match session_user(&ctx, &headers).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    let req = AuthorizeRequest {
        response_type: params.response_type,
        client_id: params.client_id,
        redirect_uri: params.redirect_uri,
        scope: params.scope,
        state: params.state,
        code_challenge: params.code_challenge,
        code_challenge_method: params.code_challenge_method,
    };
    match OAuthService::new(ctx).authorize(&user.id, req).await {
        Ok(AuthorizeOutcome::Redirect(location)) => {
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        Ok(AuthorizeOutcome::ConsentRequired {
            request_id,
            client_name,
            scopes,
        }) => Json(json!({
            "consent_required": true,
            "request_id": request_id,
            "client_id": client_name,
            "scopes": scopes,
        }))
        .into_response(),
        Err(e) => AuthorizeHttpError(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    pub request_id: String,
    pub approved: bool,
}

pub async fn consent(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Form(form): Form<ConsentForm>,
) -> Response {
    let user = match session_user(&ctx, &headers).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    let decision = ConsentDecision {
        request_id: form.request_id,
        approved: form.approved,
    };
    match OAuthService::new(ctx).consent(&user.id, decision).await {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(e) => AuthorizeHttpError(e).into_response(),
    }
}

// ─── Token, introspection, revocation ────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct TokenForm {
    #[serde(default)]
    pub grant_type: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

pub async fn token(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Result<Json<basaltpass::oauth::TokenResponse>, OAuthHttpError> {
    let (client_id, client_secret) = extract::client_credentials(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );
    let req = TokenRequest {
        grant_type: form.grant_type,
        client_id,
        client_secret,
        code: form.code,
        redirect_uri: form.redirect_uri,
        code_verifier: form.code_verifier,
        refresh_token: form.refresh_token,
        scope: form.scope,
    };
    Ok(Json(OAuthService::new(ctx).token(req).await?))
}

#[derive(Debug, Deserialize)]
pub struct TokenOnlyForm {
    #[serde(default)]
    pub token: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

pub async fn introspect(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Form(form): Form<TokenOnlyForm>,
) -> Result<Response, OAuthHttpError> {
    let (client_id, client_secret) = extract::client_credentials(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );
    let response = OAuthService::new(ctx)
        .introspect(&client_id, client_secret.as_deref(), &form.token)
        .await?;
    Ok(Json(response).into_response())
}

pub async fn revoke(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Form(form): Form<TokenOnlyForm>,
) -> Result<Response, OAuthHttpError> {
    let (client_id, client_secret) = extract::client_credentials(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );
    OAuthService::new(ctx)
        .revoke(&client_id, client_secret.as_deref(), &form.token)
        .await?;
    Ok(Json(json!({})).into_response())
}

pub async fn userinfo(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Response, OAuthHttpError> {
    let token = extract::bearer(&headers).ok_or_else(|| {
        OAuthHttpError(OAuthError::new(
            OAuthErrorCode::InvalidToken,
            "missing bearer token",
        ))
    })?;
    let info = OAuthService::new(ctx).userinfo(token).await?;
    Ok(Json(info).into_response())
}

// ─── Tenants ─────────────────────────────────────────────────────

/// Read a tenant through an access token. A token bound to another
/// tenant is refused unless its user holds the global read permission;
/// the refusal carries no tenant metadata.
pub async fn get_tenant(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(tenant_id): Path<String>,
) -> Response {
    let Some(token) = extract::bearer(&headers) else {
        return OAuthHttpError(OAuthError::new(
            OAuthErrorCode::InvalidToken,
            "missing bearer token",
        ))
        .into_response();
    };
    let access = match OAuthService::new(ctx.clone()).authenticate_bearer(token).await {
        Ok(access) => access,
        Err(e) => return OAuthHttpError(e).into_response(),
    };

    if access.tenant_id != tenant_id {
        let allowed = match &access.user_id {
            Some(user_id) => {
                let check = RbacService::new(ctx.clone())
                    .has_permission(
                        user_id,
                        Some(&tenant_id),
                        None,
                        rbac::permission::TENANT_READ_ALL,
                    )
                    .await;
                match check {
                    Ok(allowed) => allowed,
                    Err(e) => return HttpError::from(e).into_response(),
                }
            }
            None => false,
        };
        if !allowed {
            return HttpError::from(ApiError::new(ErrorCode::PermissionDenied)).into_response();
        }
    }

    match TenantService::new(ctx).get(&tenant_id).await {
        Ok(tenant) => Json(tenant).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

// ─── Sessions ────────────────────────────────────────────────────

pub async fn check_session(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let user = session_user(&ctx, &headers).await?;
    Ok(Json(json!({ "active": true, "user": user })).into_response())
}

pub async fn end_session(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    if let Some(token) = extract::bearer(&headers) {
        SessionService::new(ctx).end(token).await?;
    }
    Ok(Json(json!({})).into_response())
}

// ─── Registration & login ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: String,
    pub tenant_id: Option<String>,
}

pub async fn register(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<RegisterBody>,
) -> Result<Response, HttpError> {
    let signup_id = IdentityService::new(ctx)
        .register(RegisterInput {
            email: body.email,
            phone: body.phone,
            password: body.password,
            tenant_id: body.tenant_id,
        })
        .await?;
    Ok(Json(json!({ "signup_id": signup_id })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ResendBody {
    pub signup_id: String,
    pub channel: ChallengeChannel,
}

pub async fn resend(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<ResendBody>,
) -> Result<Response, HttpError> {
    IdentityService::new(ctx)
        .resend_code(&body.signup_id, body.channel)
        .await?;
    Ok(Json(json!({})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ConfirmBody {
    pub signup_id: String,
    pub channel: ChallengeChannel,
    pub code: String,
}

pub async fn confirm(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<ConfirmBody>,
) -> Result<Response, HttpError> {
    let user = IdentityService::new(ctx)
        .confirm(&body.signup_id, body.channel, &body.code)
        .await?;
    Ok(Json(user).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub identifier: String,
    pub password: String,
    pub totp_code: Option<String>,
}

pub async fn login(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<LoginBody>,
) -> Result<Response, HttpError> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let session = IdentityService::new(ctx)
        .login(LoginInput {
            identifier: body.identifier,
            password: body.password,
            totp_code: body.totp_code,
            ip: None,
            user_agent,
        })
        .await?;
    Ok(Json(json!({
        "token": session.token,
        "expires_at": session.expires_at,
    }))
    .into_response())
}
