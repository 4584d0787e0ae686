// Error taxonomy for the control plane.
//
// Every component boundary converts lower-level failures into one of the
// codes below; HTTP handlers map codes to status lines without ever leaking
// driver messages. OAuth endpoints use their own RFC-shaped error type
// (`basaltpass::oauth::OAuthError`) instead of this one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // AuthN — generic on purpose; bad identifier and wrong password are
    // indistinguishable to the caller.
    AuthFailed,
    TwoFactorRequired,
    UserBanned,
    SessionExpired,
    InvalidToken,

    // AuthZ
    PermissionDenied,
    TenantMismatch,

    // Input
    InvalidRequest,
    PasswordTooShort,
    PasswordTooLong,
    CodeIncorrect,

    // Not found (opaque under the caller's context)
    NotFound,
    UserNotFound,
    TenantNotFound,
    AppNotFound,
    ClientNotFound,
    RoleNotFound,

    // Conflict / state violations
    UserAlreadyExists,
    TenantCodeTaken,
    TenantNotActive,
    AppQuotaExceeded,
    RoleInUse,
    SystemRoleImmutable,
    OwnerImmutable,
    ChallengeExpired,
    ChallengeLocked,
    TooManyAttempts,
    ResendTooSoon,

    // Transient / fatal
    StoreUnavailable,
    InvariantViolation,
    InternalServerError,
}

impl ErrorCode {
    /// Default HTTP status for this code.
    pub fn status(&self) -> HttpStatus {
        use ErrorCode::*;
        match self {
            AuthFailed | TwoFactorRequired | UserBanned | SessionExpired | InvalidToken => {
                HttpStatus::Unauthorized
            }
            PermissionDenied | TenantMismatch => HttpStatus::Forbidden,
            InvalidRequest | PasswordTooShort | PasswordTooLong | CodeIncorrect => {
                HttpStatus::BadRequest
            }
            NotFound | UserNotFound | TenantNotFound | AppNotFound | ClientNotFound
            | RoleNotFound => HttpStatus::NotFound,
            UserAlreadyExists | TenantCodeTaken | TenantNotActive | AppQuotaExceeded
            | RoleInUse | SystemRoleImmutable | OwnerImmutable | ChallengeExpired
            | ChallengeLocked | TooManyAttempts | ResendTooSoon => HttpStatus::Conflict,
            StoreUnavailable => HttpStatus::ServiceUnavailable,
            InvariantViolation | InternalServerError => HttpStatus::InternalServerError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::AuthFailed => "Invalid identifier or password",
            Self::TwoFactorRequired => "Two-factor code required",
            Self::UserBanned => "Account is banned",
            Self::SessionExpired => "Session expired",
            Self::InvalidToken => "Invalid token",
            Self::PermissionDenied => "Permission denied",
            Self::TenantMismatch => "Token is not bound to this tenant",
            Self::InvalidRequest => "Malformed or missing parameter",
            Self::PasswordTooShort => "Password too short",
            Self::PasswordTooLong => "Password too long",
            Self::CodeIncorrect => "Incorrect verification code",
            Self::NotFound => "Not found",
            Self::UserNotFound => "User not found",
            Self::TenantNotFound => "Tenant not found",
            Self::AppNotFound => "App not found",
            Self::ClientNotFound => "Client not found",
            Self::RoleNotFound => "Role not found",
            Self::UserAlreadyExists => "User already exists",
            Self::TenantCodeTaken => "Tenant code already taken",
            Self::TenantNotActive => "Tenant is not active",
            Self::AppQuotaExceeded => "App quota exceeded for this plan",
            Self::RoleInUse => "Role is bound to one or more users",
            Self::SystemRoleImmutable => "System roles cannot be modified",
            Self::OwnerImmutable => "Owner membership requires a transfer",
            Self::ChallengeExpired => "Verification challenge expired",
            Self::ChallengeLocked => "Verification challenge locked",
            Self::TooManyAttempts => "Too many verification attempts",
            Self::ResendTooSoon => "Resend requested too soon",
            Self::StoreUnavailable => "Data store unavailable",
            Self::InvariantViolation => "Invariant violation",
            Self::InternalServerError => "Internal server error",
        };
        write!(f, "{msg}")
    }
}

/// HTTP status codes used by the API error system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpStatus {
    Ok = 200,
    Found = 302,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    Conflict = 409,
    ServiceUnavailable = 503,
    InternalServerError = 500,
}

impl HttpStatus {
    pub fn status_code(&self) -> u16 {
        *self as u16
    }
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status_code())
    }
}

/// API error carrying an HTTP status, a stable code, and a message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status} {code:?}: {message}")]
pub struct ApiError {
    pub status: HttpStatus,
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    /// Build an error with the code's default status and message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            status: code.status(),
            code,
            message: code.to_string(),
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code,
            "message": self.message,
        })
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

/// Internal (non-HTTP) error for configuration and wiring failures.
#[derive(Debug, thiserror::Error)]
pub enum BasaltError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Unified result type for control-plane operations.
pub type Result<T> = std::result::Result<T, BasaltError>;
