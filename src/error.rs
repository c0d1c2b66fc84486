use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// RFC 6749 protocol errors plus the profile-defined MFA step-up code.
///
/// Variants map 1:1 onto the wire error codes. Descriptions are kept
/// deliberately generic so responses never help an attacker distinguish
/// unknown-code from expired-code or unknown-client from bad-secret.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Client authentication failed")]
    InvalidClient,

    #[error("The provided grant is invalid, expired, or revoked")]
    InvalidGrant,

    #[error("Client is not authorized for this grant type")]
    UnauthorizedClient,

    #[error("Grant type not supported")]
    UnsupportedGrantType,

    #[error("Only response_type=code is supported")]
    UnsupportedResponseType,

    #[error("One or more requested scopes are not available")]
    InvalidScope,

    #[error("Authentication of the end-user is required")]
    LoginRequired,

    #[error("Multi-factor authentication is required")]
    MfaRequired,

    #[error("Invalid or expired access token")]
    InvalidToken,

    #[error("Internal server error")]
    ServerError(#[from] anyhow::Error),
}

impl OAuthError {
    /// Wire error code per RFC 6749 §5.2 / OIDC Core §3.1.2.6
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::InvalidGrant => "invalid_grant",
            OAuthError::UnauthorizedClient => "unauthorized_client",
            OAuthError::UnsupportedGrantType => "unsupported_grant_type",
            OAuthError::UnsupportedResponseType => "unsupported_response_type",
            OAuthError::InvalidScope => "invalid_scope",
            OAuthError::LoginRequired => "login_required",
            OAuthError::MfaRequired => "mfa_required",
            OAuthError::InvalidToken => "invalid_token",
            OAuthError::ServerError(_) => "server_error",
        }
    }
}

/// RFC 6749 §5.2 error body.
#[derive(Debug, Clone, Serialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl From<&OAuthError> for OAuthErrorBody {
    fn from(err: &OAuthError) -> Self {
        let description = match err {
            // Internal detail stays in the logs
            OAuthError::ServerError(_) => None,
            other => Some(other.to_string()),
        };
        Self {
            error: err.code().to_string(),
            error_description: description,
            error_uri: None,
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if let OAuthError::ServerError(ref source) = self {
            tracing::error!(error = %source, "internal error serving oauth request");
        }

        let body = Json(OAuthErrorBody::from(&self));
        match self {
            OAuthError::InvalidClient => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, r#"Basic realm="oauth""#)],
                body,
            )
                .into_response(),
            OAuthError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, r#"Bearer error="invalid_token""#)],
                body,
            )
                .into_response(),
            OAuthError::LoginRequired => (StatusCode::UNAUTHORIZED, body).into_response(),
            OAuthError::ServerError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
            _ => (StatusCode::BAD_REQUEST, body).into_response(),
        }
    }
}

/// Errors surfaced by the MFA orchestrator.
///
/// `InvalidChallenge` covers both unknown challenge ids and user mismatches
/// so callers cannot enumerate other users' challenges.
#[derive(Debug, thiserror::Error)]
pub enum MfaError {
    #[error("Invalid challenge")]
    InvalidChallenge,

    #[error("Challenge expired")]
    Expired,

    #[error("Challenge locked after too many attempts")]
    Locked,

    #[error("Verification code is incorrect")]
    InvalidCode { remaining_attempts: u32 },

    #[error("Unsupported factor for this operation")]
    UnsupportedFactor,

    #[error("Factor not found")]
    UnknownFactor,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl MfaError {
    pub fn code(&self) -> &'static str {
        match self {
            MfaError::InvalidChallenge | MfaError::InvalidCode { .. } => "mfa_invalid",
            MfaError::Expired => "mfa_expired",
            MfaError::Locked => "mfa_locked",
            MfaError::UnsupportedFactor => "invalid_request",
            MfaError::UnknownFactor => "factor_not_found",
            MfaError::Internal(_) => "server_error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct MfaErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_attempts: Option<u32>,
}

impl IntoResponse for MfaError {
    fn into_response(self) -> Response {
        if let MfaError::Internal(ref source) = self {
            tracing::error!(error = %source, "internal error serving mfa request");
        }

        let status = match self {
            MfaError::Locked => StatusCode::TOO_MANY_REQUESTS,
            MfaError::UnknownFactor => StatusCode::NOT_FOUND,
            MfaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        let remaining = match self {
            MfaError::InvalidCode { remaining_attempts } => Some(remaining_attempts),
            _ => None,
        };
        let body = Json(MfaErrorBody {
            error: self.code(),
            remaining_attempts: remaining,
        });
        (status, body).into_response()
    }
}
