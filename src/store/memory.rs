//! In-memory [`Store`] implementation.
//!
//! Each table sits behind its own `tokio::sync::RwLock`; the check-and-set
//! operations (consume, rotate, delete-once) run their test and their write
//! inside a single write-lock section, which gives the exactly-one-winner
//! guarantee the protocol needs. Lookups clone records out so readers never
//! observe partial mutation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CodeConsumption, RotationOutcome, Store, StoredSigningKey, SweepStats};
use crate::models::{
    AccessTokenRecord, AuthorizationCode, Client, MfaChallenge, MfaFactor, RefreshTokenRecord,
    User,
};
use crate::utils::secret::constant_time_eq;

#[derive(Default)]
pub struct MemoryStore {
    clients: RwLock<HashMap<String, Client>>,
    users: RwLock<HashMap<String, User>>,
    /// Keyed by code hash
    codes: RwLock<HashMap<String, AuthorizationCode>>,
    /// Keyed by token hash
    access_tokens: RwLock<HashMap<String, AccessTokenRecord>>,
    /// Keyed by token hash
    refresh_tokens: RwLock<HashMap<String, RefreshTokenRecord>>,
    factors: RwLock<HashMap<Uuid, MfaFactor>>,
    challenges: RwLock<HashMap<Uuid, MfaChallenge>>,
    signing_keys: RwLock<Vec<StoredSigningKey>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_client(&self, client: Client) -> anyhow::Result<()> {
        self.clients
            .write()
            .await
            .insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn find_client(&self, client_id: &str) -> anyhow::Result<Option<Client>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }

    async fn put_user(&self, user: User) -> anyhow::Result<()> {
        self.users.write().await.insert(user.sub.clone(), user);
        Ok(())
    }

    async fn find_user(&self, sub: &str) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(sub).cloned())
    }

    async fn put_code(&self, code: AuthorizationCode) -> anyhow::Result<()> {
        self.codes
            .write()
            .await
            .insert(code.code_hash.clone(), code);
        Ok(())
    }

    async fn consume_code(&self, code_hash: &str) -> anyhow::Result<CodeConsumption> {
        let mut codes = self.codes.write().await;
        match codes.get_mut(code_hash) {
            None => Ok(CodeConsumption::NotFound),
            Some(code) if code.used => Ok(CodeConsumption::Replayed(code.clone())),
            Some(code) => {
                code.used = true;
                Ok(CodeConsumption::Consumed(code.clone()))
            }
        }
    }

    async fn record_code_issuance(
        &self,
        code_id: Uuid,
        access_id: Uuid,
        chain_id: Option<Uuid>,
    ) -> anyhow::Result<()> {
        let mut codes = self.codes.write().await;
        if let Some(code) = codes.values_mut().find(|c| c.id == code_id) {
            code.issued_access_ids.push(access_id);
            if chain_id.is_some() {
                code.issued_chain_id = chain_id;
            }
        }
        Ok(())
    }

    async fn put_access_token(&self, token: AccessTokenRecord) -> anyhow::Result<()> {
        self.access_tokens
            .write()
            .await
            .insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn find_access_token(
        &self,
        token_hash: &str,
    ) -> anyhow::Result<Option<AccessTokenRecord>> {
        Ok(self.access_tokens.read().await.get(token_hash).cloned())
    }

    async fn revoke_access_token(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut tokens = self.access_tokens.write().await;
        match tokens.values_mut().find(|t| t.id == id) {
            Some(token) => {
                token.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put_refresh_token(&self, token: RefreshTokenRecord) -> anyhow::Result<()> {
        self.refresh_tokens
            .write()
            .await
            .insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> anyhow::Result<Option<RefreshTokenRecord>> {
        Ok(self.refresh_tokens.read().await.get(token_hash).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
    ) -> anyhow::Result<RotationOutcome> {
        let mut tokens = self.refresh_tokens.write().await;
        let Some(old) = tokens.values_mut().find(|t| t.id == old_id) else {
            anyhow::bail!("refresh token {old_id} disappeared during rotation");
        };
        if old.revoked || old.replaced_by.is_some() {
            return Ok(RotationOutcome::Superseded(old.clone()));
        }
        old.replaced_by = Some(replacement.id);
        tokens.insert(replacement.token_hash.clone(), replacement);
        Ok(RotationOutcome::Rotated)
    }

    async fn revoke_chain(&self, chain_id: Uuid) -> anyhow::Result<u64> {
        let mut refresh = self.refresh_tokens.write().await;
        let mut revoked_ids = Vec::new();
        for token in refresh.values_mut().filter(|t| t.chain_id == chain_id) {
            if !token.revoked {
                token.revoked = true;
                revoked_ids.push(token.id);
            }
        }
        drop(refresh);

        let mut count = revoked_ids.len() as u64;
        let mut access = self.access_tokens.write().await;
        for token in access.values_mut() {
            if let Some(refresh_id) = token.refresh_id {
                if revoked_ids.contains(&refresh_id) && !token.revoked {
                    token.revoked = true;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn put_factor(&self, factor: MfaFactor) -> anyhow::Result<()> {
        self.factors.write().await.insert(factor.id, factor);
        Ok(())
    }

    async fn find_factor(&self, id: Uuid) -> anyhow::Result<Option<MfaFactor>> {
        Ok(self.factors.read().await.get(&id).cloned())
    }

    async fn list_factors(&self, user_id: &str) -> anyhow::Result<Vec<MfaFactor>> {
        let mut factors: Vec<MfaFactor> = self
            .factors
            .read()
            .await
            .values()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        factors.sort_by_key(|f| f.created_at);
        Ok(factors)
    }

    async fn update_factor(&self, factor: MfaFactor) -> anyhow::Result<()> {
        self.factors.write().await.insert(factor.id, factor);
        Ok(())
    }

    async fn delete_factor(&self, id: Uuid, user_id: &str) -> anyhow::Result<bool> {
        let mut factors = self.factors.write().await;
        match factors.get(&id) {
            Some(factor) if factor.user_id == user_id => {
                factors.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_backup_code(
        &self,
        factor_id: Uuid,
        code_hash: &str,
    ) -> anyhow::Result<bool> {
        let mut factors = self.factors.write().await;
        let Some(factor) = factors.get_mut(&factor_id) else {
            return Ok(false);
        };
        // Scan every stored hash so timing does not reveal the match position
        let mut matched: Option<usize> = None;
        for (i, stored) in factor.backup_codes.iter().enumerate() {
            if constant_time_eq(stored, code_hash) {
                matched = Some(i);
            }
        }
        match matched {
            Some(i) => {
                factor.backup_codes.remove(i);
                factor.last_used_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put_challenge(&self, challenge: MfaChallenge) -> anyhow::Result<()> {
        self.challenges
            .write()
            .await
            .insert(challenge.id, challenge);
        Ok(())
    }

    async fn find_challenge(&self, id: Uuid) -> anyhow::Result<Option<MfaChallenge>> {
        Ok(self.challenges.read().await.get(&id).cloned())
    }

    async fn increment_challenge_attempts(&self, id: Uuid) -> anyhow::Result<Option<u32>> {
        let mut challenges = self.challenges.write().await;
        Ok(challenges.get_mut(&id).map(|c| {
            c.attempts += 1;
            c.attempts
        }))
    }

    async fn delete_challenge(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.challenges.write().await.remove(&id).is_some())
    }

    async fn put_signing_key(&self, key: StoredSigningKey) -> anyhow::Result<()> {
        let mut keys = self.signing_keys.write().await;
        keys.retain(|k| k.kid != key.kid);
        keys.push(key);
        Ok(())
    }

    async fn list_signing_keys(&self) -> anyhow::Result<Vec<StoredSigningKey>> {
        Ok(self.signing_keys.read().await.clone())
    }

    async fn delete_signing_key(&self, kid: &str) -> anyhow::Result<bool> {
        let mut keys = self.signing_keys.write().await;
        let before = keys.len();
        keys.retain(|k| k.kid != kid);
        Ok(keys.len() != before)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> anyhow::Result<SweepStats> {
        let mut stats = SweepStats::default();

        {
            let mut codes = self.codes.write().await;
            let before = codes.len();
            codes.retain(|_, c| c.expires_at >= now);
            stats.codes = before - codes.len();
        }
        {
            let mut tokens = self.access_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, t| t.expires_at >= now);
            stats.access_tokens = before - tokens.len();
        }
        {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, t| t.absolute_expires_at >= now);
            stats.refresh_tokens = before - tokens.len();
        }
        {
            let mut challenges = self.challenges.write().await;
            let before = challenges.len();
            challenges.retain(|_, c| c.expires_at >= now);
            stats.challenges = before - challenges.len();
        }

        Ok(stats)
    }
}
