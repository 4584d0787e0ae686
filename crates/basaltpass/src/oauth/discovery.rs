// OIDC-style discovery metadata and the JWKS document.
//
// Tokens are opaque, so the key set is published but empty; resource
// servers are expected to introspect rather than verify signatures.

use serde::Serialize;

use super::OAuthService;

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,
    pub end_session_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
    pub scopes_supported: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JwksDocument {
    pub keys: Vec<serde_json::Value>,
}

impl OAuthService {
    /// Build `/.well-known/openid-configuration`.
    pub fn discovery(&self) -> DiscoveryDocument {
        let issuer = self.ctx.options.issuer.trim_end_matches('/').to_string();
        let mut methods = vec!["S256"];
        if self.ctx.options.allow_plain_pkce {
            methods.push("plain");
        }
        DiscoveryDocument {
            authorization_endpoint: format!("{issuer}/oauth/authorize"),
            token_endpoint: format!("{issuer}/oauth/token"),
            userinfo_endpoint: format!("{issuer}/oauth/userinfo"),
            introspection_endpoint: format!("{issuer}/oauth/introspect"),
            revocation_endpoint: format!("{issuer}/oauth/revoke"),
            end_session_endpoint: format!("{issuer}/end_session"),
            jwks_uri: format!("{issuer}/oauth/jwks"),
            response_types_supported: vec!["code"],
            grant_types_supported: vec![
                "authorization_code",
                "refresh_token",
                "client_credentials",
            ],
            code_challenge_methods_supported: methods,
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic",
                "client_secret_post",
                "none",
            ],
            scopes_supported: self.ctx.options.supported_scopes.clone(),
            issuer,
        }
    }

    pub fn jwks(&self) -> JwksDocument {
        JwksDocument { keys: Vec::new() }
    }
}
