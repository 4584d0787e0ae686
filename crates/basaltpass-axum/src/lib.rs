//! # basaltpass-axum
//!
//! HTTP surface for the BasaltPass control plane. Builds an [`axum`]
//! router over a shared [`AppContext`]; all tenancy is derived from the
//! presented token, never from request headers.

mod error;
mod extract;
mod handlers;

pub use error::{AuthorizeHttpError, HttpError, OAuthHttpError};

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use basaltpass::AppContext;

/// Build the full API router.
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route(
            "/.well-known/openid-configuration",
            get(handlers::discovery),
        )
        .route("/oauth/jwks", get(handlers::jwks))
        .route("/oauth/authorize", get(handlers::authorize))
        .route("/oauth/consent", post(handlers::consent))
        .route("/oauth/token", post(handlers::token))
        .route("/oauth/introspect", post(handlers::introspect))
        .route("/oauth/revoke", post(handlers::revoke))
        .route("/oauth/userinfo", get(handlers::userinfo))
        .route("/tenants/{tenant_id}", get(handlers::get_tenant))
        .route("/check_session", get(handlers::check_session))
        .route("/end_session", get(handlers::end_session))
        .route("/auth/register", post(handlers::register))
        .route("/auth/resend", post(handlers::resend))
        .route("/auth/confirm", post(handlers::confirm))
        .route("/auth/login", post(handlers::login))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
