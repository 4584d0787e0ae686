// Response glue for the two error families.
//
// Control-plane errors render as `{code, message}` JSON with the code's
// HTTP status. OAuth endpoint errors render RFC 6749 shapes, and
// authorize-stage failures after redirect validation become 302s back
// to the client.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use basaltpass::oauth::{AuthorizeError, OAuthError};
use basaltpass_core::error::{ApiError, BasaltError, ErrorCode};

pub struct HttpError(pub BasaltError);

impl From<BasaltError> for HttpError {
    fn from(e: BasaltError) -> Self {
        Self(e)
    }
}

impl From<ApiError> for HttpError {
    fn from(e: ApiError) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let api = match self.0 {
            BasaltError::Api(api) => api,
            BasaltError::Store(e) => {
                tracing::error!(error = %e, "store failure");
                ApiError::new(ErrorCode::StoreUnavailable)
            }
            other => {
                tracing::error!(error = %other, "unhandled failure");
                ApiError::new(ErrorCode::InternalServerError)
            }
        };
        let status = StatusCode::from_u16(api.status.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(api.to_json())).into_response()
    }
}

pub struct OAuthHttpError(pub OAuthError);

impl From<OAuthError> for OAuthHttpError {
    fn from(e: OAuthError) -> Self {
        Self(e)
    }
}

impl IntoResponse for OAuthHttpError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code.http_status())
            .unwrap_or(StatusCode::BAD_REQUEST);
        (status, Json(self.0.to_json())).into_response()
    }
}

pub struct AuthorizeHttpError(pub AuthorizeError);

impl From<AuthorizeError> for AuthorizeHttpError {
    fn from(e: AuthorizeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AuthorizeHttpError {
    fn into_response(self) -> Response {
        if let Some(location) = self.0.redirect_location() {
            return (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
        }
        match self.0 {
            AuthorizeError::Direct(e) | AuthorizeError::Redirect { error: e, .. } => {
                OAuthHttpError(e).into_response()
            }
        }
    }
}
