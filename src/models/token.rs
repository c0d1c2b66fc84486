use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issued access token. The wire form is an RS256 JWT; this record keyed by
/// the token hash backs introspection and revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    /// Matches the `jti` claim of the JWT form
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub client_id: String,
    /// Absent for client-credentials tokens
    pub subject: Option<String>,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Refresh token this access token was minted alongside, if any
    pub refresh_id: Option<Uuid>,
    pub revoked: bool,
}

impl AccessTokenRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_active(&self) -> bool {
        !self.revoked && !self.is_expired()
    }
}

/// Issued refresh token (opaque, hashed at rest).
///
/// Rotation links successors through `replaced_by`; every token in one
/// rotation lineage shares `chain_id` and the original
/// `absolute_expires_at`. At most one token per chain has
/// `replaced_by == None && !revoked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub client_id: String,
    pub subject: String,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub absolute_expires_at: DateTime<Utc>,
    pub chain_id: Uuid,
    pub replaced_by: Option<Uuid>,
    pub revoked: bool,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.absolute_expires_at
    }

    /// Active means: head of its chain, not revoked, not past the absolute lifetime
    pub fn is_active(&self) -> bool {
        !self.revoked && self.replaced_by.is_none() && !self.is_expired()
    }
}
