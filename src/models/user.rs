use serde::{Deserialize, Serialize};

/// Authenticated end-user as supplied by the login collaborator.
///
/// The core never creates or mutates users; it only reads claims off them
/// when building ID Tokens and UserInfo responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Stable subject identifier
    pub sub: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// OIDC claims selected by scope, shared between ID Tokens and UserInfo.
///
/// `profile` exposes name and picture; `email` exposes email and
/// email_verified. `sub` is always present and carried separately.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopedClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

impl ScopedClaims {
    pub fn for_scopes(user: &User, scopes: &[String]) -> Self {
        let has = |s: &str| scopes.iter().any(|sc| sc == s);
        let mut claims = Self::default();
        if has("profile") {
            claims.name = user.name.clone();
            claims.picture = user.picture.clone();
        }
        if has("email") {
            claims.email = Some(user.email.clone());
            claims.email_verified = Some(user.email_verified);
        }
        claims
    }
}
