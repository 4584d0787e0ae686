// End-to-end flows through the authorization server against the
// in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use url::Url;

use basaltpass_core::id::generate_id;
use basaltpass_core::model::{AppUserStatus, GrantType, TenantPlan, User};
use basaltpass_core::options::BasaltOptions;
use basaltpass_memory::MemoryStore;

use crate::clients::{ClientService, RegisterClientInput};
use crate::context::AppContext;
use crate::oauth::*;
use crate::tenants::{CreateTenantInput, TenantService};

const REDIRECT: &str = "https://app.acme.test/cb";
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

struct Fixture {
    ctx: Arc<AppContext>,
    oauth: OAuthService,
    user: User,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

async fn fixture() -> Fixture {
    let ctx = AppContext::new(BasaltOptions::default(), Arc::new(MemoryStore::new()));
    let now = Utc::now();
    let user = ctx
        .store
        .create_user(User {
            id: generate_id(),
            email: "alice@acme.test".into(),
            phone: None,
            password_hash: None,
            totp_secret: None,
            two_factor_enabled: false,
            email_verified: true,
            phone_verified: false,
            banned: false,
            nickname: "alice".into(),
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
    let clients = ClientService::new(ctx.clone());
    let app = clients
        .create_app(&user.id, &tenant.id, "Dashboard".into(), String::new())
        .await
        .unwrap();
    let (client, secret) = clients
        .register_client(
            &user.id,
            &app.id,
            RegisterClientInput {
                redirect_uris: vec![REDIRECT.into()],
                scopes: vec!["openid".into(), "profile".into(), "email".into()],
                grant_types: vec![
                    GrantType::AuthorizationCode,
                    GrantType::RefreshToken,
                    GrantType::ClientCredentials,
                ],
                allowed_origins: vec![],
                public: false,
            },
        )
        .await
        .unwrap();
    Fixture {
        oauth: OAuthService::new(ctx.clone()),
        ctx,
        user,
        tenant_id: tenant.id,
        client_id: client.client_id,
        client_secret: secret.unwrap(),
    }
}

/// Register a second app carrying a public (secretless) client.
async fn public_client(f: &Fixture) -> String {
    let clients = ClientService::new(f.ctx.clone());
    let app = clients
        .create_app(&f.user.id, &f.tenant_id, "Mobile".into(), String::new())
        .await
        .unwrap();
    let (client, secret) = clients
        .register_client(
            &f.user.id,
            &app.id,
            RegisterClientInput {
                redirect_uris: vec![REDIRECT.into()],
                scopes: vec!["openid".into(), "profile".into()],
                grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
                allowed_origins: vec![],
                public: true,
            },
        )
        .await
        .unwrap();
    assert!(secret.is_none());
    client.client_id
}

fn authorize_request(f: &Fixture) -> AuthorizeRequest {
    AuthorizeRequest {
        response_type: "code".into(),
        client_id: f.client_id.clone(),
        redirect_uri: REDIRECT.into(),
        scope: "openid profile".into(),
        state: Some("st8".into()),
        code_challenge: Some(CHALLENGE.into()),
        code_challenge_method: Some("S256".into()),
    }
}

fn query_map(location: &str) -> HashMap<String, String> {
    Url::parse(location)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Run authorize + consent for an arbitrary request and return the code.
async fn obtain_code_for(f: &Fixture, req: AuthorizeRequest) -> String {
    let outcome = f.oauth.authorize(&f.user.id, req).await.unwrap();
    let location = match outcome {
        AuthorizeOutcome::ConsentRequired { request_id, .. } => f
            .oauth
            .consent(
                &f.user.id,
                ConsentDecision {
                    request_id,
                    approved: true,
                },
            )
            .await
            .unwrap(),
        AuthorizeOutcome::Redirect(location) => location,
    };
    query_map(&location).get("code").unwrap().clone()
}

/// Run authorize + consent and return the freshly minted code.
async fn obtain_code(f: &Fixture) -> String {
    let outcome = f
        .oauth
        .authorize(&f.user.id, authorize_request(f))
        .await
        .unwrap();
    let location = match outcome {
        AuthorizeOutcome::ConsentRequired { request_id, .. } => f
            .oauth
            .consent(
                &f.user.id,
                ConsentDecision {
                    request_id,
                    approved: true,
                },
            )
            .await
            .unwrap(),
        AuthorizeOutcome::Redirect(location) => location,
    };
    let query = query_map(&location);
    assert_eq!(query.get("state").map(String::as_str), Some("st8"));
    query.get("code").unwrap().clone()
}

fn token_request(f: &Fixture, code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: "authorization_code".into(),
        client_id: f.client_id.clone(),
        client_secret: Some(f.client_secret.clone()),
        code: Some(code.into()),
        redirect_uri: Some(REDIRECT.into()),
        code_verifier: Some(VERIFIER.into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_code_flow() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    assert!(code.starts_with("bp_ac_"));

    let tokens = f.oauth.token(token_request(&f, &code)).await.unwrap();
    assert!(tokens.access_token.starts_with("bp_at_"));
    assert!(tokens.refresh_token.as_ref().unwrap().starts_with("bp_rt_"));
    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.expires_in, 3600);
    assert_eq!(tokens.scope, "openid profile");

    let info = f.oauth.userinfo(&tokens.access_token).await.unwrap();
    assert_eq!(info.sub, f.user.id);
    assert_eq!(info.name.as_deref(), Some("alice"));
    // email scope was not granted.
    assert!(info.email.is_none());
    assert_eq!(info.tenant_id, f.tenant_id);

    let intro = f
        .oauth
        .introspect(&f.client_id, Some(&f.client_secret), &tokens.access_token)
        .await
        .unwrap();
    assert!(intro.active);
    assert_eq!(intro.sub.as_deref(), Some(f.user.id.as_str()));
    assert_eq!(intro.tenant_id.as_deref(), Some(f.tenant_id.as_str()));
}

#[tokio::test]
async fn test_code_is_single_use() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    f.oauth.token(token_request(&f, &code)).await.unwrap();
    let err = f.oauth.token(token_request(&f, &code)).await.unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::InvalidGrant);
}

#[tokio::test]
async fn test_second_authorize_skips_consent() {
    let f = fixture().await;
    obtain_code(&f).await;
    let outcome = f
        .oauth
        .authorize(&f.user.id, authorize_request(&f))
        .await
        .unwrap();
    assert!(matches!(outcome, AuthorizeOutcome::Redirect(_)));
}

#[tokio::test]
async fn test_wrong_verifier_rejected() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let mut req = token_request(&f, &code);
    req.code_verifier = Some("a".repeat(43));
    let err = f.oauth.token(req).await.unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::InvalidGrant);
}

#[tokio::test]
async fn test_redirect_uri_must_match_code() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let mut req = token_request(&f, &code);
    req.redirect_uri = Some("https://evil.test/cb".into());
    let err = f.oauth.token(req).await.unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::InvalidGrant);
}

#[tokio::test]
async fn test_bad_client_secret() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let mut req = token_request(&f, &code);
    req.client_secret = Some("wrong".into());
    let err = f.oauth.token(req).await.unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::InvalidClient);
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let f = fixture().await;
    let err = f
        .oauth
        .token(TokenRequest {
            grant_type: "password".into(),
            client_id: f.client_id.clone(),
            client_secret: Some(f.client_secret.clone()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::UnsupportedGrantType);
}

#[tokio::test]
async fn test_refresh_rotation() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let first = f.oauth.token(token_request(&f, &code)).await.unwrap();
    let old_refresh = first.refresh_token.clone().unwrap();

    let second = f
        .oauth
        .token(TokenRequest {
            grant_type: "refresh_token".into(),
            client_id: f.client_id.clone(),
            client_secret: Some(f.client_secret.clone()),
            refresh_token: Some(old_refresh.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_ne!(second.access_token, first.access_token);
    assert_ne!(second.refresh_token.as_ref().unwrap(), &old_refresh);

    // The rotated-out pair is dead: refresh again fails, and the old
    // access token no longer introspects as active.
    let err = f
        .oauth
        .token(TokenRequest {
            grant_type: "refresh_token".into(),
            client_id: f.client_id.clone(),
            client_secret: Some(f.client_secret.clone()),
            refresh_token: Some(old_refresh),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::InvalidGrant);

    let intro = f
        .oauth
        .introspect(&f.client_id, Some(&f.client_secret), &first.access_token)
        .await
        .unwrap();
    assert!(!intro.active);
}

#[tokio::test]
async fn test_refresh_scope_narrowing_only() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let first = f.oauth.token(token_request(&f, &code)).await.unwrap();

    let narrowed = f
        .oauth
        .token(TokenRequest {
            grant_type: "refresh_token".into(),
            client_id: f.client_id.clone(),
            client_secret: Some(f.client_secret.clone()),
            refresh_token: first.refresh_token.clone(),
            scope: Some("openid".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(narrowed.scope, "openid");

    let err = f
        .oauth
        .token(TokenRequest {
            grant_type: "refresh_token".into(),
            client_id: f.client_id.clone(),
            client_secret: Some(f.client_secret.clone()),
            refresh_token: narrowed.refresh_token.clone(),
            scope: Some("openid profile email".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::InvalidScope);
}

#[tokio::test]
async fn test_client_credentials_has_no_user() {
    let f = fixture().await;
    let tokens = f
        .oauth
        .token(TokenRequest {
            grant_type: "client_credentials".into(),
            client_id: f.client_id.clone(),
            client_secret: Some(f.client_secret.clone()),
            scope: Some("openid".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(tokens.refresh_token.is_none());

    let intro = f
        .oauth
        .introspect(&f.client_id, Some(&f.client_secret), &tokens.access_token)
        .await
        .unwrap();
    assert!(intro.active);
    assert!(intro.sub.is_none());

    let err = f.oauth.userinfo(&tokens.access_token).await.unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::InvalidToken);
}

#[tokio::test]
async fn test_revocation() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let tokens = f.oauth.token(token_request(&f, &code)).await.unwrap();

    // Revoking an unknown token still succeeds.
    f.oauth
        .revoke(&f.client_id, Some(&f.client_secret), "bp_at_unknown")
        .await
        .unwrap();

    // Revoking the refresh token kills the paired access token too.
    f.oauth
        .revoke(
            &f.client_id,
            Some(&f.client_secret),
            tokens.refresh_token.as_ref().unwrap(),
        )
        .await
        .unwrap();
    let intro = f
        .oauth
        .introspect(&f.client_id, Some(&f.client_secret), &tokens.access_token)
        .await
        .unwrap();
    assert!(!intro.active);
}

#[tokio::test]
async fn test_unknown_client_is_direct_error() {
    let f = fixture().await;
    let mut req = authorize_request(&f);
    req.client_id = "bp_cli_nonexistent".into();
    let err = f.oauth.authorize(&f.user.id, req).await.unwrap_err();
    assert!(matches!(err, AuthorizeError::Direct(_)));
    assert!(err.redirect_location().is_none());
}

#[tokio::test]
async fn test_unregistered_redirect_is_direct_error() {
    let f = fixture().await;
    let mut req = authorize_request(&f);
    req.redirect_uri = "https://evil.test/cb".into();
    let err = f.oauth.authorize(&f.user.id, req).await.unwrap_err();
    assert!(matches!(err, AuthorizeError::Direct(_)));
}

#[tokio::test]
async fn test_bad_response_type_is_direct_error() {
    // Response type is validated before the redirect URI, so the
    // failure renders instead of redirecting.
    let f = fixture().await;
    let mut req = authorize_request(&f);
    req.response_type = "token".into();
    let err = f.oauth.authorize(&f.user.id, req).await.unwrap_err();
    assert!(matches!(err, AuthorizeError::Direct(_)));
    assert!(err.redirect_location().is_none());
}

#[tokio::test]
async fn test_excess_scope_redirects_invalid_scope() {
    let f = fixture().await;
    let mut req = authorize_request(&f);
    req.scope = "openid wallet".into();
    let err = f.oauth.authorize(&f.user.id, req).await.unwrap_err();
    let query = query_map(&err.redirect_location().unwrap());
    assert_eq!(query.get("error").map(String::as_str), Some("invalid_scope"));
}

#[tokio::test]
async fn test_confidential_client_may_skip_pkce() {
    let f = fixture().await;
    let mut req = authorize_request(&f);
    req.code_challenge = None;
    req.code_challenge_method = None;
    let code = obtain_code_for(&f, req).await;

    let mut token_req = token_request(&f, &code);
    token_req.code_verifier = None;
    let tokens = f.oauth.token(token_req).await.unwrap();
    assert!(tokens.access_token.starts_with("bp_at_"));
    assert!(tokens.refresh_token.is_some());
}

#[tokio::test]
async fn test_public_client_requires_pkce() {
    let f = fixture().await;
    let client_id = public_client(&f).await;
    let mut req = authorize_request(&f);
    req.client_id = client_id;
    req.code_challenge = None;
    req.code_challenge_method = None;
    let err = f.oauth.authorize(&f.user.id, req).await.unwrap_err();
    let query = query_map(&err.redirect_location().unwrap());
    assert_eq!(
        query.get("error").map(String::as_str),
        Some("invalid_request")
    );
}

#[tokio::test]
async fn test_public_client_exchanges_without_secret() {
    let f = fixture().await;
    let client_id = public_client(&f).await;
    let mut req = authorize_request(&f);
    req.client_id = client_id.clone();
    let code = obtain_code_for(&f, req).await;

    let tokens = f
        .oauth
        .token(TokenRequest {
            grant_type: "authorization_code".into(),
            client_id,
            client_secret: None,
            code: Some(code),
            redirect_uri: Some(REDIRECT.into()),
            code_verifier: Some(VERIFIER.into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(tokens.access_token.starts_with("bp_at_"));
    assert!(tokens.refresh_token.is_some());
}

#[tokio::test]
async fn test_consent_denial_redirects_access_denied() {
    let f = fixture().await;
    let outcome = f
        .oauth
        .authorize(&f.user.id, authorize_request(&f))
        .await
        .unwrap();
    let AuthorizeOutcome::ConsentRequired { request_id, .. } = outcome else {
        panic!("expected consent prompt");
    };
    let err = f
        .oauth
        .consent(
            &f.user.id,
            ConsentDecision {
                request_id: request_id.clone(),
                approved: false,
            },
        )
        .await
        .unwrap_err();
    let query = query_map(&err.redirect_location().unwrap());
    assert_eq!(query.get("error").map(String::as_str), Some("access_denied"));

    // The stash was consumed; replaying the decision fails outright.
    let err = f
        .oauth
        .consent(
            &f.user.id,
            ConsentDecision {
                request_id,
                approved: true,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthorizeError::Direct(_)));
}

#[tokio::test]
async fn test_suspended_tenant_refuses_issuance_and_validation() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let tokens = f.oauth.token(token_request(&f, &code)).await.unwrap();

    TenantService::new(f.ctx.clone())
        .suspend(&f.user.id, &f.tenant_id)
        .await
        .unwrap();

    // Existing tokens stop validating.
    let intro = f
        .oauth
        .introspect(&f.client_id, Some(&f.client_secret), &tokens.access_token)
        .await
        .unwrap();
    assert!(!intro.active);

    // New issuance is refused.
    let err = f
        .oauth
        .token(TokenRequest {
            grant_type: "refresh_token".into(),
            client_id: f.client_id.clone(),
            client_secret: Some(f.client_secret.clone()),
            refresh_token: tokens.refresh_token.clone(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::AccessDenied);
}

#[tokio::test]
async fn test_deactivated_client_tokens_go_inactive() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let tokens = f.oauth.token(token_request(&f, &code)).await.unwrap();

    // A second confidential client performs the introspection calls
    // once the issuing client is switched off.
    let clients = ClientService::new(f.ctx.clone());
    let app = clients
        .create_app(&f.user.id, &f.tenant_id, "Backend".into(), String::new())
        .await
        .unwrap();
    let (observer, observer_secret) = clients
        .register_client(
            &f.user.id,
            &app.id,
            RegisterClientInput {
                redirect_uris: vec![REDIRECT.into()],
                scopes: vec!["openid".into()],
                grant_types: vec![GrantType::ClientCredentials],
                allowed_origins: vec![],
                public: false,
            },
        )
        .await
        .unwrap();
    let observer_secret = observer_secret.unwrap();

    clients
        .update_client(&f.client_id, None, None, None, Some(false))
        .await
        .unwrap();

    let intro = f
        .oauth
        .introspect(
            &observer.client_id,
            Some(&observer_secret),
            &tokens.access_token,
        )
        .await
        .unwrap();
    assert!(!intro.active);
    let intro = f
        .oauth
        .introspect(
            &observer.client_id,
            Some(&observer_secret),
            tokens.refresh_token.as_ref().unwrap(),
        )
        .await
        .unwrap();
    assert!(!intro.active);
    assert!(f.oauth.userinfo(&tokens.access_token).await.is_err());
}

#[tokio::test]
async fn test_app_banned_user_loses_bearer_access() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let tokens = f.oauth.token(token_request(&f, &code)).await.unwrap();
    f.oauth.userinfo(&tokens.access_token).await.unwrap();

    let access = f
        .ctx
        .store
        .get_access_token(&tokens.access_token)
        .await
        .unwrap()
        .unwrap();
    let mut app_user = f
        .ctx
        .store
        .get_app_user(&access.app_id, &f.user.id)
        .await
        .unwrap()
        .unwrap();
    app_user.status = AppUserStatus::Banned;
    f.ctx.store.upsert_app_user(app_user).await.unwrap();

    let err = f.oauth.userinfo(&tokens.access_token).await.unwrap_err();
    assert_eq!(err.code, OAuthErrorCode::InvalidToken);
}

#[tokio::test]
async fn test_banned_user_tokens_go_inactive() {
    let f = fixture().await;
    let code = obtain_code(&f).await;
    let tokens = f.oauth.token(token_request(&f, &code)).await.unwrap();

    let mut user = f.ctx.store.get_user(&f.user.id).await.unwrap().unwrap();
    user.banned = true;
    f.ctx.store.update_user(user).await.unwrap();

    let intro = f
        .oauth
        .introspect(&f.client_id, Some(&f.client_secret), &tokens.access_token)
        .await
        .unwrap();
    assert!(!intro.active);
    assert!(f.oauth.userinfo(&tokens.access_token).await.is_err());
}

#[tokio::test]
async fn test_introspection_never_errors_on_unknown_token() {
    let f = fixture().await;
    let intro = f
        .oauth
        .introspect(&f.client_id, Some(&f.client_secret), "bp_at_bogus")
        .await
        .unwrap();
    assert!(!intro.active);
    assert!(intro.scope.is_none());
}

#[tokio::test]
async fn test_discovery_document() {
    let f = fixture().await;
    let doc = f.oauth.discovery();
    assert_eq!(doc.issuer, "http://localhost:8080");
    assert_eq!(
        doc.authorization_endpoint,
        "http://localhost:8080/oauth/authorize"
    );
    assert!(doc.grant_types_supported.contains(&"client_credentials"));
    assert!(doc.code_challenge_methods_supported.contains(&"S256"));
    assert!(f.oauth.jwks().keys.is_empty());
}
