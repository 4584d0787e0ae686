// RFC 6749 error vocabulary for the authorization server endpoints.
//
// These errors are wire-shaped: `code` goes into the `error` field and
// `description` into `error_description`. Internal failures collapse to
// `server_error` so nothing from the storage layer leaks.

use serde::Serialize;

use basaltpass_core::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    AccessDenied,
    InvalidToken,
    ServerError,
}

impl OAuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::AccessDenied => "access_denied",
            Self::InvalidToken => "invalid_token",
            Self::ServerError => "server_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient | Self::InvalidToken => 401,
            Self::AccessDenied => 403,
            Self::ServerError => 500,
            _ => 400,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {}", code.as_str(), description)]
pub struct OAuthError {
    pub code: OAuthErrorCode,
    pub description: String,
}

impl OAuthError {
    pub fn new(code: OAuthErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidRequest, description)
    }

    pub fn invalid_client() -> Self {
        Self::new(OAuthErrorCode::InvalidClient, "client authentication failed")
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidGrant, description)
    }

    pub fn invalid_scope() -> Self {
        Self::new(OAuthErrorCode::InvalidScope, "requested scope not allowed")
    }

    pub fn server_error() -> Self {
        Self::new(OAuthErrorCode::ServerError, "internal error")
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.code.as_str(),
            "error_description": self.description,
        })
    }
}

impl From<StoreError> for OAuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(_) => Self::invalid_grant("grant is no longer valid"),
            _ => Self::server_error(),
        }
    }
}

/// Failure mode of the authorize endpoint. Errors detected before the
/// client and redirect URI are validated must be shown directly; only
/// later failures may be sent back to the client via redirect.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthorizeError {
    #[error("{0}")]
    Direct(OAuthError),
    #[error("{error}")]
    Redirect {
        redirect_uri: String,
        state: Option<String>,
        error: OAuthError,
    },
}

impl AuthorizeError {
    /// Location header value for the redirect case.
    pub fn redirect_location(&self) -> Option<String> {
        let AuthorizeError::Redirect {
            redirect_uri,
            state,
            error,
        } = self
        else {
            return None;
        };
        let mut url = url::Url::parse(redirect_uri).ok()?;
        url.query_pairs_mut()
            .append_pair("error", error.code.as_str())
            .append_pair("error_description", &error.description);
        if let Some(state) = state {
            url.query_pairs_mut().append_pair("state", state);
        }
        Some(url.into())
    }
}

impl From<StoreError> for AuthorizeError {
    fn from(e: StoreError) -> Self {
        Self::Direct(e.into())
    }
}
