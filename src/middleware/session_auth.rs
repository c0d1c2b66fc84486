//! Login-session gate for user-facing routes (MFA management).
//!
//! Resolves the opaque session token through the login collaborator and
//! injects the [`AuthenticatedSession`] plus the raw token as request
//! extensions. No session means 401 before the handler ever runs.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::AppState;
use crate::error::OAuthError;
use crate::services::sessions::session_token_from_headers;

/// The raw session token, kept around so handlers can report MFA completion
/// back to the login collaborator.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

pub async fn session_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = session_token_from_headers(request.headers()) else {
        return OAuthError::LoginRequired.into_response();
    };
    let Some(session) = state.sessions.resolve(&token).await else {
        return OAuthError::LoginRequired.into_response();
    };

    request.extensions_mut().insert(session);
    request.extensions_mut().insert(SessionToken(token));
    next.run(request).await
}
