//! HTTP surface of the OAuth2/OIDC core:
//! - GET  /oauth/authorize   - authorization requests
//! - POST /oauth/token       - token grants
//! - POST /oauth/introspect  - RFC 7662 introspection
//! - POST /oauth/revoke      - RFC 7009 revocation
//! - GET/POST /oauth/userinfo - OIDC UserInfo

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};

use crate::config::AppState;
use crate::dto::oauth::{
    AuthorizationRequest, IntrospectionRequest, RevokeRequest, TokenRequest, UserInfoResponse,
};
use crate::error::{OAuthError, OAuthErrorBody};
use crate::models::ScopedClaims;
use crate::services::oauth::AuthorizeReject;
use crate::services::sessions::session_token_from_headers;
use crate::services::{OAuthService, TokenService};

fn oauth_service(state: &AppState) -> OAuthService {
    OAuthService::new(
        state.store.clone(),
        state.keys.clone(),
        state.config.clone(),
    )
}

fn token_service(state: &AppState) -> TokenService {
    TokenService::new(
        state.store.clone(),
        state.keys.clone(),
        state.config.clone(),
    )
}

// ============================================================================
// Authorization endpoint
// ============================================================================

/// GET /oauth/authorize
///
/// Until the client and redirect URI check out, failures are rendered
/// directly and never redirected; afterwards errors travel back to the
/// client with the verbatim `state`. A live login session yields a code
/// redirect.
pub async fn authorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(req): Query<AuthorizationRequest>,
) -> Response {
    let service = oauth_service(&state);

    let client = match service.validate_authorization_request(&req).await {
        Ok(client) => client,
        Err(AuthorizeReject::Page(err)) => return err.into_response(),
        Err(AuthorizeReject::Redirect(err)) => {
            return error_redirect(&req.redirect_uri, &err, req.state.as_deref());
        }
    };

    // The login collaborator supplies the authenticated subject; without a
    // session there is nothing to authorize
    let session = match session_token_from_headers(&headers) {
        Some(token) => state.sessions.resolve(&token).await,
        None => None,
    };
    let Some(session) = session else {
        return OAuthError::LoginRequired.into_response();
    };

    let code = match service
        .create_authorization_code(&client, &session, &req)
        .await
    {
        Ok(code) => code,
        Err(err) => return error_redirect(&req.redirect_uri, &err, req.state.as_deref()),
    };

    let mut location = format!(
        "{}{}code={}",
        req.redirect_uri,
        if req.redirect_uri.contains('?') { "&" } else { "?" },
        urlencoding::encode(&code)
    );
    if let Some(state_param) = &req.state {
        location.push_str(&format!("&state={}", urlencoding::encode(state_param)));
    }
    found(&location)
}

/// 302 Found, the redirect status RFC 6749 prescribes for the
/// authorization response.
fn found(location: &str) -> Response {
    match axum::http::HeaderValue::from_str(location) {
        Ok(value) => {
            (StatusCode::FOUND, [(header::LOCATION, value)]).into_response()
        }
        Err(_) => OAuthError::InvalidRequest("redirect_uri is not a valid header value".to_string())
            .into_response(),
    }
}

/// Deliver an authorization error to the client via redirect (RFC 6749
/// §4.1.2.1). Only the defined error code and a generic description are
/// carried; `state` is echoed verbatim when present.
fn error_redirect(redirect_uri: &str, err: &OAuthError, state: Option<&str>) -> Response {
    let body = OAuthErrorBody::from(err);
    let mut location = format!(
        "{}{}error={}",
        redirect_uri,
        if redirect_uri.contains('?') { "&" } else { "?" },
        urlencoding::encode(&body.error)
    );
    if let Some(description) = &body.error_description {
        location.push_str(&format!(
            "&error_description={}",
            urlencoding::encode(description)
        ));
    }
    if let Some(state) = state {
        location.push_str(&format!("&state={}", urlencoding::encode(state)));
    }
    found(&location)
}

// ============================================================================
// Token endpoint
// ============================================================================

/// POST /oauth/token
///
/// Client authentication happens before any grant logic; the grant itself
/// dispatches on the parsed `grant_type`. Successful responses are marked
/// uncacheable per RFC 6749 §5.1.
pub async fn token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<TokenRequest>,
) -> Result<Response, OAuthError> {
    let creds = crate::utils::auth::extract_client_credentials(
        &headers,
        req.client_id.as_deref(),
        req.client_secret.as_deref(),
    )?;
    let grant = req.grant()?;

    let response = oauth_service(&state).token(creds, grant).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    )
        .into_response())
}

// ============================================================================
// Introspection endpoint (RFC 7662)
// ============================================================================

/// POST /oauth/introspect
///
/// Requires client authentication. Dead tokens produce `{"active": false}`
/// with no further fields.
pub async fn introspect_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<IntrospectionRequest>,
) -> Result<Response, OAuthError> {
    let creds = crate::utils::auth::extract_client_credentials(
        &headers,
        req.client_id.as_deref(),
        req.client_secret.as_deref(),
    )?;
    let service = oauth_service(&state);
    service.clients().authenticate(&creds).await?;

    let response = service.tokens().introspect(&req.token).await?;
    Ok((
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store")],
        Json(response),
    )
        .into_response())
}

// ============================================================================
// Revocation endpoint (RFC 7009)
// ============================================================================

/// POST /oauth/revoke
///
/// Always 200 once the client authenticates, whether or not the token
/// existed; revoking twice is as good as revoking once.
pub async fn revoke_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<RevokeRequest>,
) -> Result<StatusCode, OAuthError> {
    let creds = crate::utils::auth::extract_client_credentials(
        &headers,
        req.client_id.as_deref(),
        req.client_secret.as_deref(),
    )?;
    let service = oauth_service(&state);
    let client = service.clients().authenticate(&creds).await?;

    service.tokens().revoke(&req.token, &client).await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// UserInfo endpoint
// ============================================================================

/// GET/POST /oauth/userinfo
///
/// Bearer-protected. Claims beyond `sub` appear according to the token's
/// scopes, using the same mapping the ID Token uses.
pub async fn userinfo_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserInfoResponse>, OAuthError> {
    let token =
        crate::utils::auth::extract_bearer_token(&headers).ok_or(OAuthError::InvalidToken)?;

    let record = token_service(&state).validate_bearer(token).await?;
    let subject = record.subject.as_deref().ok_or(OAuthError::InvalidToken)?;

    let user = state
        .store
        .find_user(subject)
        .await
        .map_err(OAuthError::ServerError)?
        .ok_or(OAuthError::InvalidToken)?;

    let claims = ScopedClaims::for_scopes(&user, &record.scopes);
    Ok(Json(UserInfoResponse {
        sub: user.sub,
        name: claims.name,
        picture: claims.picture,
        email: claims.email,
        email_verified: claims.email_verified,
    }))
}
