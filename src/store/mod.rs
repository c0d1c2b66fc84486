//! Storage abstraction for the authorization server core.
//!
//! Every record type supports plain put/find plus the handful of atomic
//! check-and-set transitions the protocol depends on: consuming an
//! authorization code, rotating a refresh token, and destroying a challenge
//! exactly once. A database-backed implementation must map these onto
//! conditional updates; the bundled [`MemoryStore`] serialises them behind
//! per-table write locks.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AccessTokenRecord, AuthorizationCode, Client, MfaChallenge, MfaFactor, RefreshTokenRecord,
    User,
};

/// Outcome of the atomic fresh -> consumed transition on a code.
#[derive(Debug)]
pub enum CodeConsumption {
    /// First consumption; the caller now owns the redemption
    Consumed(AuthorizationCode),
    /// The code had already been consumed - replay, carry out compensation
    Replayed(AuthorizationCode),
    NotFound,
}

/// Outcome of the atomic refresh-token rotation check-and-set.
#[derive(Debug)]
pub enum RotationOutcome {
    /// The old token was active and is now marked replaced
    Rotated,
    /// The old token was already replaced or revoked - replay
    Superseded(RefreshTokenRecord),
}

/// Counts of records reclaimed by one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub codes: usize,
    pub access_tokens: usize,
    pub refresh_tokens: usize,
    pub challenges: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.codes + self.access_tokens + self.refresh_tokens + self.challenges
    }
}

/// Persisted signing key material. Only the authorization server ever reads
/// the private PEM back; JWKS publication goes through the key manager.
#[derive(Debug, Clone)]
pub struct StoredSigningKey {
    pub kid: String,
    pub alg: String,
    pub private_key_pem: String,
    pub not_before: DateTime<Utc>,
    /// Set when the key stops signing; it remains published until this
    /// instant plus the overlap window
    pub not_after: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Clients
    async fn put_client(&self, client: Client) -> anyhow::Result<()>;
    async fn find_client(&self, client_id: &str) -> anyhow::Result<Option<Client>>;

    // Users
    async fn put_user(&self, user: User) -> anyhow::Result<()>;
    async fn find_user(&self, sub: &str) -> anyhow::Result<Option<User>>;

    // Authorization codes
    async fn put_code(&self, code: AuthorizationCode) -> anyhow::Result<()>;

    /// Atomically transition a code from fresh to consumed. Concurrent calls
    /// for the same code must yield exactly one `Consumed`.
    async fn consume_code(&self, code_hash: &str) -> anyhow::Result<CodeConsumption>;

    /// Record which tokens were minted from a consumed code, for replay
    /// compensation.
    async fn record_code_issuance(
        &self,
        code_id: Uuid,
        access_id: Uuid,
        chain_id: Option<Uuid>,
    ) -> anyhow::Result<()>;

    // Access tokens
    async fn put_access_token(&self, token: AccessTokenRecord) -> anyhow::Result<()>;
    async fn find_access_token(&self, token_hash: &str)
        -> anyhow::Result<Option<AccessTokenRecord>>;
    async fn revoke_access_token(&self, id: Uuid) -> anyhow::Result<bool>;

    // Refresh tokens
    async fn put_refresh_token(&self, token: RefreshTokenRecord) -> anyhow::Result<()>;
    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> anyhow::Result<Option<RefreshTokenRecord>>;

    /// Atomically mark `old_id` replaced by `replacement` and insert the
    /// replacement. Concurrent rotations of the same token must yield
    /// exactly one `Rotated`.
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
    ) -> anyhow::Result<RotationOutcome>;

    /// Revoke every refresh token in a rotation chain together with the
    /// access tokens minted alongside them. Returns the number of records
    /// touched.
    async fn revoke_chain(&self, chain_id: Uuid) -> anyhow::Result<u64>;

    // MFA factors
    async fn put_factor(&self, factor: MfaFactor) -> anyhow::Result<()>;
    async fn find_factor(&self, id: Uuid) -> anyhow::Result<Option<MfaFactor>>;
    async fn list_factors(&self, user_id: &str) -> anyhow::Result<Vec<MfaFactor>>;
    async fn update_factor(&self, factor: MfaFactor) -> anyhow::Result<()>;
    async fn delete_factor(&self, id: Uuid, user_id: &str) -> anyhow::Result<bool>;

    /// Remove one unused backup code matching `code_hash` from the factor.
    /// Comparison is constant-time; returns whether a code was consumed.
    async fn consume_backup_code(&self, factor_id: Uuid, code_hash: &str)
        -> anyhow::Result<bool>;

    // MFA challenges
    async fn put_challenge(&self, challenge: MfaChallenge) -> anyhow::Result<()>;
    async fn find_challenge(&self, id: Uuid) -> anyhow::Result<Option<MfaChallenge>>;

    /// Bump the attempt counter; returns the new count, or None if the
    /// challenge no longer exists.
    async fn increment_challenge_attempts(&self, id: Uuid) -> anyhow::Result<Option<u32>>;

    /// Remove a challenge. Returns whether this call removed it, so a
    /// concurrent double-verify resolves to a single winner.
    async fn delete_challenge(&self, id: Uuid) -> anyhow::Result<bool>;

    // Signing keys
    async fn put_signing_key(&self, key: StoredSigningKey) -> anyhow::Result<()>;
    async fn list_signing_keys(&self) -> anyhow::Result<Vec<StoredSigningKey>>;
    async fn delete_signing_key(&self, kid: &str) -> anyhow::Result<bool>;

    /// Drop every record whose lifetime ended before `now`. Never removes a
    /// live record.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> anyhow::Result<SweepStats>;
}
