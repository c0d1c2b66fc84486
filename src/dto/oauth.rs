//! OAuth2 / OIDC request and response DTOs.
//!
//! Parameter names follow RFC 6749, RFC 7636, RFC 7662, and OIDC Core 1.0
//! verbatim. The token request additionally parses into the [`TokenGrant`]
//! union so grant dispatch is exhaustive instead of stringly-typed.

use serde::{Deserialize, Serialize};

use crate::error::OAuthError;

// ============================================================================
// Authorization endpoint
// ============================================================================

/// Query parameters of GET /oauth/authorize.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
}

impl AuthorizationRequest {
    /// Requested scopes as a list (space-separated on the wire).
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_ref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Token endpoint
// ============================================================================

/// Raw form body of POST /oauth/token. Which fields are required depends on
/// the grant; [`TokenRequest::grant`] enforces that.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// A fully-parsed token request, one variant per supported grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        code_verifier: Option<String>,
    },
    ClientCredentials {
        scopes: Option<Vec<String>>,
    },
    RefreshToken {
        refresh_token: String,
        scopes: Option<Vec<String>>,
    },
}

impl TokenRequest {
    pub fn grant(&self) -> Result<TokenGrant, OAuthError> {
        match self.grant_type.as_str() {
            "authorization_code" => Ok(TokenGrant::AuthorizationCode {
                code: self
                    .code
                    .clone()
                    .ok_or_else(|| OAuthError::InvalidRequest("code is required".to_string()))?,
                redirect_uri: self.redirect_uri.clone().ok_or_else(|| {
                    OAuthError::InvalidRequest("redirect_uri is required".to_string())
                })?,
                code_verifier: self.code_verifier.clone(),
            }),
            "client_credentials" => Ok(TokenGrant::ClientCredentials {
                scopes: self.scopes(),
            }),
            "refresh_token" => Ok(TokenGrant::RefreshToken {
                refresh_token: self.refresh_token.clone().ok_or_else(|| {
                    OAuthError::InvalidRequest("refresh_token is required".to_string())
                })?,
                scopes: self.scopes(),
            }),
            _ => Err(OAuthError::UnsupportedGrantType),
        }
    }

    fn scopes(&self) -> Option<Vec<String>> {
        self.scope
            .as_ref()
            .map(|s| s.split_whitespace().map(String::from).collect())
    }
}

// ============================================================================
// Introspection and revocation
// ============================================================================

/// Form body of POST /oauth/introspect (RFC 7662 §2.1).
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionRequest {
    pub token: String,
    #[serde(default)]
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Form body of POST /oauth/revoke (RFC 7009 §2.1).
#[derive(Debug, Clone, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
    #[serde(default)]
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

// ============================================================================
// UserInfo
// ============================================================================

/// OIDC UserInfo response; optional claims appear per the token's scopes.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

// ============================================================================
// Discovery
// ============================================================================

/// OpenID Provider metadata served from /.well-known/openid-configuration.
#[derive(Debug, Clone, Serialize)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

impl OpenIdConfiguration {
    pub fn new(issuer: &str, signing_alg: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{issuer}/oauth/authorize"),
            token_endpoint: format!("{issuer}/oauth/token"),
            userinfo_endpoint: format!("{issuer}/oauth/userinfo"),
            introspection_endpoint: format!("{issuer}/oauth/introspect"),
            revocation_endpoint: format!("{issuer}/oauth/revoke"),
            jwks_uri: format!("{issuer}/.well-known/jwks.json"),
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: vec![
                "authorization_code".to_string(),
                "client_credentials".to_string(),
                "refresh_token".to_string(),
            ],
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: vec![signing_alg.to_string()],
            scopes_supported: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            claims_supported: vec![
                "sub".to_string(),
                "iss".to_string(),
                "aud".to_string(),
                "exp".to_string(),
                "iat".to_string(),
                "auth_time".to_string(),
                "nonce".to_string(),
                "name".to_string(),
                "picture".to_string(),
                "email".to_string(),
                "email_verified".to_string(),
            ],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic".to_string(),
                "client_secret_post".to_string(),
            ],
            code_challenge_methods_supported: vec!["S256".to_string(), "plain".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(grant_type: &str) -> TokenRequest {
        TokenRequest {
            grant_type: grant_type.to_string(),
            code: None,
            redirect_uri: None,
            client_id: Some("demo".to_string()),
            client_secret: None,
            code_verifier: None,
            refresh_token: None,
            scope: None,
        }
    }

    #[test]
    fn authorization_code_grant_requires_code_and_redirect_uri() {
        let mut req = base_request("authorization_code");
        assert!(matches!(req.grant(), Err(OAuthError::InvalidRequest(_))));

        req.code = Some("abc".to_string());
        req.redirect_uri = Some("https://app/cb".to_string());
        assert_eq!(
            req.grant().unwrap(),
            TokenGrant::AuthorizationCode {
                code: "abc".to_string(),
                redirect_uri: "https://app/cb".to_string(),
                code_verifier: None,
            }
        );
    }

    #[test]
    fn refresh_grant_requires_the_token() {
        let mut req = base_request("refresh_token");
        assert!(matches!(req.grant(), Err(OAuthError::InvalidRequest(_))));

        req.refresh_token = Some("rt".to_string());
        req.scope = Some("openid profile".to_string());
        assert_eq!(
            req.grant().unwrap(),
            TokenGrant::RefreshToken {
                refresh_token: "rt".to_string(),
                scopes: Some(vec!["openid".to_string(), "profile".to_string()]),
            }
        );
    }

    #[test]
    fn unknown_grant_type_is_unsupported() {
        let req = base_request("password");
        assert!(matches!(req.grant(), Err(OAuthError::UnsupportedGrantType)));
    }

    #[test]
    fn scope_list_parses_space_separated() {
        let mut req = base_request("client_credentials");
        req.scope = Some("read  write".to_string());
        assert_eq!(
            req.grant().unwrap(),
            TokenGrant::ClientCredentials {
                scopes: Some(vec!["read".to_string(), "write".to_string()]),
            }
        );
    }

    #[test]
    fn discovery_endpoints_hang_off_the_issuer() {
        let config = OpenIdConfiguration::new("https://auth.example", "RS256");
        assert_eq!(config.issuer, "https://auth.example");
        assert_eq!(
            config.authorization_endpoint,
            "https://auth.example/oauth/authorize"
        );
        assert_eq!(config.jwks_uri, "https://auth.example/.well-known/jwks.json");
        assert_eq!(config.response_types_supported, vec!["code"]);
        assert!(config
            .code_challenge_methods_supported
            .contains(&"S256".to_string()));
    }
}
