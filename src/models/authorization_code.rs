use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authorization Code - single-use credential minted by the authorization
/// endpoint and redeemed at the token endpoint within `code_ttl` seconds.
///
/// Only the SHA-256 hash of the code is kept; the plaintext goes to the
/// client once and is never reissued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub id: Uuid,
    pub code_hash: String,
    pub client_id: String,
    pub subject: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    /// When the login collaborator authenticated the subject
    pub auth_time: DateTime<Utc>,
    /// Whether the subject completed an MFA challenge before the code was minted
    pub mfa_passed: bool,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    /// Access tokens minted from this code, kept for replay compensation
    pub issued_access_ids: Vec<Uuid>,
    /// Refresh rotation chain started by this code, if any
    pub issued_chain_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}
