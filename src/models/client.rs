use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grant types a client may be allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth Client - a registered application
///
/// Confidential clients carry a bcrypt hash of their secret; public clients
/// carry none and must use PKCE on the authorization-code flow instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret_hash: Option<String>,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub allowed_grants: Vec<GrantType>,
    pub trusted: bool,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Check if this is a public client (no secret registered)
    pub fn is_public(&self) -> bool {
        self.client_secret_hash.is_none()
    }

    /// Check if a redirect URI is registered for this client (exact match)
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    /// Check if the client may use the given grant type
    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.allowed_grants.contains(&grant)
    }

    /// Check if every requested scope is in the client's allow-list
    pub fn allows_scopes(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.allowed_scopes.iter().any(|a| a == s))
    }
}
