//! Read-only metadata endpoints:
//! - GET /.well-known/openid-configuration
//! - GET /.well-known/jwks.json

use axum::{extract::State, Json};

use crate::config::AppState;
use crate::dto::oauth::OpenIdConfiguration;
use crate::services::keys::JsonWebKeySet;

pub async fn openid_configuration_handler(
    State(state): State<AppState>,
) -> Json<OpenIdConfiguration> {
    Json(OpenIdConfiguration::new(
        &state.config.issuer_url,
        state.config.signing_alg.as_str(),
    ))
}

pub async fn jwks_handler(State(state): State<AppState>) -> Json<JsonWebKeySet> {
    Json(state.keys.jwks())
}
