// The authorize endpoint and the consent step.
//
// Validation order matters: client, response type, and redirect URI are
// checked first, and nothing is ever redirected to a URI that has not
// passed the allowlist. Only failures after that point travel back to
// the client as `?error=` query parameters.

use chrono::{Duration, Utc};
use url::Url;

use basaltpass_core::audit::{action, AuditRecord};
use basaltpass_core::id::generate_id;
use basaltpass_core::model::{parse_scope, AuthorizationCode, Consent, PendingAuthorization};

use super::error::{AuthorizeError, OAuthError, OAuthErrorCode};
use super::{pkce, OAuthService};
use crate::crypto::random;

#[derive(Debug, Clone, Default)]
pub struct AuthorizeRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// What the authorize endpoint produced for an authenticated user.
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    /// Consent already on file; redirect with a fresh code.
    Redirect(String),
    /// The user must decide; the stash id round-trips through the
    /// consent form.
    ConsentRequired {
        request_id: String,
        client_name: String,
        scopes: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ConsentDecision {
    pub request_id: String,
    pub approved: bool,
}

impl OAuthService {
    /// Handle `GET /oauth/authorize` for an authenticated user.
    pub async fn authorize(
        &self,
        user_id: &str,
        req: AuthorizeRequest,
    ) -> Result<AuthorizeOutcome, AuthorizeError> {
        // Pre-redirect validation: unknown client, wrong response type,
        // or an unregistered URI is a dead end, not a redirect.
        let client = self
            .active_client(&req.client_id)
            .await
            .map_err(AuthorizeError::Direct)?
            .ok_or_else(|| AuthorizeError::Direct(OAuthError::invalid_client()))?;
        if req.response_type != "code" {
            return Err(AuthorizeError::Direct(OAuthError::new(
                OAuthErrorCode::UnsupportedResponseType,
                "only response_type=code is supported",
            )));
        }
        if req.redirect_uri.is_empty() || !client.validate_redirect_uri(&req.redirect_uri) {
            return Err(AuthorizeError::Direct(OAuthError::invalid_request(
                "redirect_uri is not registered for this client",
            )));
        }

        let redirect = |error: OAuthError| AuthorizeError::Redirect {
            redirect_uri: req.redirect_uri.clone(),
            state: req.state.clone(),
            error,
        };

        let scopes = parse_scope(&req.scope);
        if !client.scopes_contained(&scopes) {
            return Err(redirect(OAuthError::invalid_scope()));
        }

        match (&req.code_challenge, &req.code_challenge_method) {
            (None, None) => {
                if client.is_public && self.ctx.options.require_pkce_for_public {
                    return Err(redirect(OAuthError::invalid_request(
                        "code_challenge is required for public clients",
                    )));
                }
            }
            (Some(challenge), method) => {
                let method = method.as_deref().unwrap_or(pkce::METHOD_PLAIN);
                let method_ok = method == pkce::METHOD_S256
                    || (method == pkce::METHOD_PLAIN && self.ctx.options.allow_plain_pkce);
                if !method_ok || challenge.is_empty() {
                    return Err(redirect(OAuthError::invalid_request(
                        "unsupported code_challenge_method",
                    )));
                }
            }
            (None, Some(_)) => {
                return Err(redirect(OAuthError::invalid_request(
                    "code_challenge_method without code_challenge",
                )));
            }
        }

        let (tenant, app) = self
            .active_chain(&client)
            .await
            .map_err(|e| redirect(e))?;

        // Skip the consent screen when a prior grant covers every
        // requested scope.
        let consent = self
            .ctx
            .store
            .get_consent(user_id, &client.client_id)
            .await
            .map_err(|e| AuthorizeError::Direct(e.into()))?;
        if consent.map(|c| c.covers(&scopes)).unwrap_or(false) {
            let location = self
                .issue_code_redirect(user_id, &client.client_id, &tenant.id, &app.id, &req, scopes)
                .await
                .map_err(AuthorizeError::Direct)?;
            return Ok(AuthorizeOutcome::Redirect(location));
        }

        let now = Utc::now();
        let pending = PendingAuthorization {
            id: generate_id(),
            client_id: client.client_id.clone(),
            user_id: user_id.to_string(),
            tenant_id: tenant.id,
            app_id: app.id,
            redirect_uri: req.redirect_uri.clone(),
            scopes: scopes.clone(),
            state: req.state.clone(),
            code_challenge: req.code_challenge.clone(),
            code_challenge_method: req.code_challenge_method.clone(),
            expires_at: now + Duration::seconds(self.ctx.options.pending_authorization_ttl_secs),
            created_at: now,
        };
        let pending = self
            .ctx
            .store
            .create_pending_authorization(pending)
            .await
            .map_err(|e| AuthorizeError::Direct(e.into()))?;
        Ok(AuthorizeOutcome::ConsentRequired {
            request_id: pending.id,
            client_name: client.client_id,
            scopes,
        })
    }

    /// Handle `POST /oauth/consent`. A denial still redirects, carrying
    /// `error=access_denied` so the client can recover.
    pub async fn consent(
        &self,
        user_id: &str,
        decision: ConsentDecision,
    ) -> Result<String, AuthorizeError> {
        let pending = self
            .ctx
            .store
            .take_pending_authorization(&decision.request_id)
            .await?
            .filter(|p| p.expires_at > Utc::now())
            .ok_or_else(|| {
                AuthorizeError::Direct(OAuthError::invalid_request(
                    "unknown or expired authorization request",
                ))
            })?;
        if pending.user_id != user_id {
            return Err(AuthorizeError::Direct(OAuthError::new(
                OAuthErrorCode::AccessDenied,
                "authorization request belongs to another user",
            )));
        }

        if !decision.approved {
            self.ctx
                .audit
                .record(
                    AuditRecord::new(action::CONSENT_DENIED)
                        .actor(user_id)
                        .subject(&pending.client_id),
                )
                .await;
            return Err(AuthorizeError::Redirect {
                redirect_uri: pending.redirect_uri,
                state: pending.state,
                error: OAuthError::new(OAuthErrorCode::AccessDenied, "user denied the request"),
            });
        }

        // Record (or widen) the consent so the next authorize skips the
        // prompt.
        let now = Utc::now();
        let mut scopes = pending.scopes.clone();
        if let Some(existing) = self
            .ctx
            .store
            .get_consent(user_id, &pending.client_id)
            .await?
        {
            for s in existing.scopes {
                if !scopes.contains(&s) {
                    scopes.push(s);
                }
            }
        }
        self.ctx
            .store
            .upsert_consent(Consent {
                id: generate_id(),
                user_id: user_id.to_string(),
                client_id: pending.client_id.clone(),
                scopes,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::CONSENT_GRANTED)
                    .actor(user_id)
                    .subject(&pending.client_id),
            )
            .await;

        let req = AuthorizeRequest {
            redirect_uri: pending.redirect_uri.clone(),
            state: pending.state.clone(),
            code_challenge: pending.code_challenge.clone(),
            code_challenge_method: pending.code_challenge_method.clone(),
            ..Default::default()
        };
        self.issue_code_redirect(
            user_id,
            &pending.client_id,
            &pending.tenant_id,
            &pending.app_id,
            &req,
            pending.scopes,
        )
        .await
        .map_err(AuthorizeError::Direct)
    }

    /// Mint a single-use code and build the success redirect.
    async fn issue_code_redirect(
        &self,
        user_id: &str,
        client_id: &str,
        tenant_id: &str,
        app_id: &str,
        req: &AuthorizeRequest,
        scopes: Vec<String>,
    ) -> Result<String, OAuthError> {
        let now = Utc::now();
        let code = AuthorizationCode {
            code: random::auth_code(),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            app_id: app_id.to_string(),
            redirect_uri: req.redirect_uri.clone(),
            scopes,
            code_challenge: req.code_challenge.clone(),
            code_challenge_method: req
                .code_challenge
                .as_ref()
                .map(|_| {
                    req.code_challenge_method
                        .clone()
                        .unwrap_or_else(|| pkce::METHOD_PLAIN.to_string())
                }),
            expires_at: now + Duration::seconds(self.ctx.options.auth_code_ttl_secs),
            used: false,
            created_at: now,
        };
        let code = self.ctx.store.create_auth_code(code).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::CODE_ISSUED)
                    .actor(user_id)
                    .tenant(tenant_id)
                    .subject(client_id),
            )
            .await;

        let mut url =
            Url::parse(&req.redirect_uri).map_err(|_| OAuthError::server_error())?;
        url.query_pairs_mut().append_pair("code", &code.code);
        if let Some(state) = &req.state {
            url.query_pairs_mut().append_pair("state", state);
        }
        Ok(url.into())
    }
}
