//! MFA orchestration: factor enrolment, challenge issuance, and
//! verification.
//!
//! Challenges are one-shot and time-limited; every verification outcome
//! (success, expiry, lockout, cancellation) destroys the record. Codes are
//! stored hashed, compared in constant time, and delivered through the
//! notifier without holding any record lock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::config::Config;
use crate::error::MfaError;
use crate::models::{FactorKind, MfaChallenge, MfaFactor, User};
use crate::services::notifier::{dispatch_code, Notifier};
use crate::store::Store;
use crate::utils::secret::{generate_numeric_code, hash_token, verify_token_hash};
use crate::utils::totp;

/// Number of backup codes issued per generation
const BACKUP_CODE_COUNT: usize = 10;

/// Length of each backup code
const BACKUP_CODE_LENGTH: usize = 8;

/// Backup code alphabet, confusable characters excluded
const BACKUP_CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Result of TOTP enrolment. Secret and backup codes are shown once.
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    pub factor_id: Uuid,
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

/// A challenge handed to the caller, destination masked.
#[derive(Debug, Clone)]
pub struct ChallengeInfo {
    pub challenge_id: Uuid,
    pub kind: FactorKind,
    pub destination_hint: Option<String>,
}

#[derive(Clone)]
pub struct MfaService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    config: Arc<Config>,
}

impl MfaService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, config: Arc<Config>) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    // ========================================================================
    // Enrolment
    // ========================================================================

    /// Begin TOTP enrolment: a fresh 160-bit secret plus a batch of backup
    /// codes. The factor only becomes verified once a challenge against it
    /// succeeds.
    pub async fn enroll_totp(&self, user: &User) -> Result<TotpEnrollment, MfaError> {
        let secret = totp::generate_secret();
        let issuer_label = self
            .config
            .issuer_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();
        let provisioning_uri = totp::provisioning_uri(&issuer_label, &user.email, &secret);

        let factor = MfaFactor {
            id: Uuid::new_v4(),
            user_id: user.sub.clone(),
            kind: FactorKind::Totp,
            enabled: true,
            verified: false,
            secret: Some(secret.clone()),
            destination: None,
            backup_codes: Vec::new(),
            created_at: Utc::now(),
            last_used_at: None,
        };
        let factor_id = factor.id;
        self.store.put_factor(factor).await?;

        let backup_codes = self.replace_backup_codes(&user.sub, false).await?;

        tracing::info!(sub = %user.sub, "totp enrolment started");
        Ok(TotpEnrollment {
            factor_id,
            secret,
            provisioning_uri,
            backup_codes,
        })
    }

    /// Enrol an sms/email factor and immediately issue the confirmation
    /// challenge to its destination.
    pub async fn enroll_destination(
        &self,
        user_id: &str,
        kind: FactorKind,
        destination: &str,
    ) -> Result<ChallengeInfo, MfaError> {
        if !kind.is_deliverable() {
            return Err(MfaError::UnsupportedFactor);
        }

        let factor = MfaFactor {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            enabled: true,
            verified: false,
            secret: None,
            destination: Some(destination.to_string()),
            backup_codes: Vec::new(),
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.store.put_factor(factor.clone()).await?;

        tracing::info!(sub = %user_id, kind = %kind, "destination factor enrolment started");
        self.issue_challenge(&factor).await
    }

    /// Replace the user's backup codes with a fresh batch.
    pub async fn regenerate_backup_codes(&self, user_id: &str) -> Result<Vec<String>, MfaError> {
        let verified = self
            .store
            .list_factors(user_id)
            .await?
            .iter()
            .any(|f| f.verified);
        self.replace_backup_codes(user_id, verified).await
    }

    async fn replace_backup_codes(
        &self,
        user_id: &str,
        verified: bool,
    ) -> Result<Vec<String>, MfaError> {
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut hashes = Vec::with_capacity(BACKUP_CODE_COUNT);
        for _ in 0..BACKUP_CODE_COUNT {
            let code = generate_backup_code();
            hashes.push(hash_token(&code));
            codes.push(code);
        }

        let existing = self
            .store
            .list_factors(user_id)
            .await?
            .into_iter()
            .find(|f| f.kind == FactorKind::BackupCode);

        let factor = match existing {
            Some(mut factor) => {
                factor.backup_codes = hashes;
                factor.verified = factor.verified || verified;
                factor
            }
            None => MfaFactor {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                kind: FactorKind::BackupCode,
                enabled: true,
                verified,
                secret: None,
                destination: None,
                backup_codes: hashes,
                created_at: Utc::now(),
                last_used_at: None,
            },
        };
        self.store.update_factor(factor).await?;
        Ok(codes)
    }

    // ========================================================================
    // Challenges
    // ========================================================================

    /// Create a challenge for one of the user's enabled factors. Verified
    /// factors win over pending ones; `preferred` narrows by kind.
    pub async fn create_challenge(
        &self,
        user_id: &str,
        preferred: Option<FactorKind>,
    ) -> Result<ChallengeInfo, MfaError> {
        let mut factors: Vec<MfaFactor> = self
            .store
            .list_factors(user_id)
            .await?
            .into_iter()
            .filter(|f| f.enabled)
            .filter(|f| preferred.map_or(true, |k| f.kind == k))
            .collect();
        factors.sort_by_key(|f| !f.verified);

        let factor = factors.into_iter().next().ok_or(MfaError::UnknownFactor)?;
        self.issue_challenge(&factor).await
    }

    async fn issue_challenge(&self, factor: &MfaFactor) -> Result<ChallengeInfo, MfaError> {
        let delivered_code = if factor.kind.is_deliverable() {
            Some(generate_numeric_code())
        } else {
            None
        };

        let challenge = MfaChallenge {
            id: Uuid::new_v4(),
            user_id: factor.user_id.clone(),
            factor_id: factor.id,
            kind: factor.kind,
            code_hash: delivered_code.as_deref().map(hash_token),
            expires_at: Utc::now() + Duration::seconds(self.config.mfa_code_ttl_secs),
            attempts: 0,
            max_attempts: self.config.mfa_max_attempts,
            created_at: Utc::now(),
        };
        let info = ChallengeInfo {
            challenge_id: challenge.id,
            kind: challenge.kind,
            destination_hint: factor.destination_hint(),
        };
        self.store.put_challenge(challenge).await?;

        // Delivery happens after the record is stored and outside any lock
        if let (Some(code), Some(destination)) = (delivered_code, factor.destination.clone()) {
            dispatch_code(Arc::clone(&self.notifier), factor.kind, destination, code);
        }

        Ok(info)
    }

    /// Verify a submitted code against a pending challenge.
    ///
    /// Unknown ids and foreign challenges report the same error. Expiry and
    /// lockout destroy the record before reporting. The attempt counter
    /// moves before any comparison so a failed process cannot retry for
    /// free.
    pub async fn verify(
        &self,
        challenge_id: Uuid,
        user_id: &str,
        submitted_code: &str,
    ) -> Result<(), MfaError> {
        let challenge = self
            .store
            .find_challenge(challenge_id)
            .await?
            .filter(|c| c.user_id == user_id)
            .ok_or(MfaError::InvalidChallenge)?;

        if challenge.is_expired() {
            self.store.delete_challenge(challenge_id).await?;
            return Err(MfaError::Expired);
        }
        if challenge.is_locked() {
            self.store.delete_challenge(challenge_id).await?;
            return Err(MfaError::Locked);
        }

        let attempts = self
            .store
            .increment_challenge_attempts(challenge_id)
            .await?
            .ok_or(MfaError::InvalidChallenge)?;

        let matched = self.check_code(&challenge, submitted_code).await?;

        if !matched {
            if attempts >= challenge.max_attempts {
                self.store.delete_challenge(challenge_id).await?;
                return Err(MfaError::Locked);
            }
            return Err(MfaError::InvalidCode {
                remaining_attempts: challenge.max_attempts - attempts,
            });
        }

        // Single-success: only the caller that removes the record wins
        if !self.store.delete_challenge(challenge_id).await? {
            return Err(MfaError::InvalidChallenge);
        }

        self.mark_factor_used(&challenge).await?;
        tracing::info!(sub = %user_id, kind = %challenge.kind, "mfa challenge verified");
        Ok(())
    }

    async fn check_code(
        &self,
        challenge: &MfaChallenge,
        submitted_code: &str,
    ) -> Result<bool, MfaError> {
        match challenge.kind {
            FactorKind::Sms | FactorKind::Email => {
                let Some(hash) = &challenge.code_hash else {
                    return Ok(false);
                };
                Ok(verify_token_hash(submitted_code, hash))
            }
            FactorKind::Totp => {
                let factor = self
                    .store
                    .find_factor(challenge.factor_id)
                    .await?
                    .ok_or(MfaError::InvalidChallenge)?;
                let secret = factor.secret.ok_or(MfaError::InvalidChallenge)?;
                let now = Utc::now().timestamp().max(0) as u64;
                totp::verify_code(&secret, submitted_code, now).map_err(MfaError::Internal)
            }
            FactorKind::BackupCode => Ok(self
                .store
                .consume_backup_code(challenge.factor_id, &hash_token(submitted_code))
                .await?),
            FactorKind::Webauthn => Err(MfaError::UnsupportedFactor),
        }
    }

    async fn mark_factor_used(&self, challenge: &MfaChallenge) -> Result<(), MfaError> {
        let Some(mut factor) = self.store.find_factor(challenge.factor_id).await? else {
            return Ok(());
        };
        let first_verification = !factor.verified;
        factor.verified = true;
        factor.last_used_at = Some(Utc::now());
        self.store.update_factor(factor).await?;

        // The backup codes issued at enrolment become usable once the
        // primary factor proves out
        if first_verification && challenge.kind != FactorKind::BackupCode {
            let backups = self
                .store
                .list_factors(&challenge.user_id)
                .await?
                .into_iter()
                .filter(|f| f.kind == FactorKind::BackupCode && !f.verified);
            for mut backup in backups {
                backup.verified = true;
                self.store.update_factor(backup).await?;
            }
        }
        Ok(())
    }

    /// Explicitly abandon a pending challenge.
    pub async fn cancel(&self, challenge_id: Uuid, user_id: &str) -> Result<(), MfaError> {
        let owned = self
            .store
            .find_challenge(challenge_id)
            .await?
            .is_some_and(|c| c.user_id == user_id);
        if !owned {
            return Err(MfaError::InvalidChallenge);
        }
        self.store.delete_challenge(challenge_id).await?;
        Ok(())
    }

    // ========================================================================
    // Factor management
    // ========================================================================

    pub async fn list_factors(&self, user_id: &str) -> Result<Vec<MfaFactor>, MfaError> {
        Ok(self.store.list_factors(user_id).await?)
    }

    pub async fn disable_factor(&self, user_id: &str, factor_id: Uuid) -> Result<(), MfaError> {
        if self.store.delete_factor(factor_id, user_id).await? {
            Ok(())
        } else {
            Err(MfaError::UnknownFactor)
        }
    }
}

fn generate_backup_code() -> String {
    let mut rng = OsRng;
    (0..BACKUP_CODE_LENGTH)
        .map(|_| {
            let idx = (rng.next_u32() as usize) % BACKUP_CODE_CHARSET.len();
            BACKUP_CODE_CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::services::notifier::testing::RecordingNotifier;
    use crate::store::MemoryStore;

    struct Harness {
        service: MfaService,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = MfaService::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::new(test_config()),
        );
        Harness {
            service,
            store,
            notifier,
        }
    }

    fn user() -> User {
        User {
            sub: "u1".to_string(),
            email: "u1@example.com".to_string(),
            email_verified: true,
            name: None,
            picture: None,
        }
    }

    fn current_code(secret: &str) -> String {
        let now = Utc::now().timestamp().max(0) as u64;
        totp::code_at(secret, now).unwrap()
    }

    #[tokio::test]
    async fn totp_enrolment_verifies_on_first_good_challenge() {
        let h = harness();
        let enrollment = h.service.enroll_totp(&user()).await.unwrap();
        assert_eq!(enrollment.backup_codes.len(), 10);
        assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));

        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::Totp))
            .await
            .unwrap();
        assert_eq!(challenge.kind, FactorKind::Totp);

        h.service
            .verify(challenge.challenge_id, "u1", &current_code(&enrollment.secret))
            .await
            .unwrap();

        let factors = h.service.list_factors("u1").await.unwrap();
        let totp_factor = factors.iter().find(|f| f.kind == FactorKind::Totp).unwrap();
        assert!(totp_factor.verified);
        assert!(totp_factor.last_used_at.is_some());
        // Backup codes become usable alongside
        let backup = factors
            .iter()
            .find(|f| f.kind == FactorKind::BackupCode)
            .unwrap();
        assert!(backup.verified);

        // The challenge is gone: the same code cannot be replayed
        let replay = h
            .service
            .verify(challenge.challenge_id, "u1", &current_code(&enrollment.secret))
            .await;
        assert!(matches!(replay, Err(MfaError::InvalidChallenge)));
    }

    #[tokio::test]
    async fn three_bad_codes_lock_the_challenge() {
        let h = harness();
        h.service.enroll_totp(&user()).await.unwrap();
        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::Totp))
            .await
            .unwrap();

        let first = h.service.verify(challenge.challenge_id, "u1", "000000").await;
        assert!(matches!(
            first,
            Err(MfaError::InvalidCode {
                remaining_attempts: 2
            })
        ));
        let second = h.service.verify(challenge.challenge_id, "u1", "000000").await;
        assert!(matches!(
            second,
            Err(MfaError::InvalidCode {
                remaining_attempts: 1
            })
        ));
        let third = h.service.verify(challenge.challenge_id, "u1", "000000").await;
        assert!(matches!(third, Err(MfaError::Locked)));

        // Locked challenges are destroyed outright
        let fourth = h.service.verify(challenge.challenge_id, "u1", "000000").await;
        assert!(matches!(fourth, Err(MfaError::InvalidChallenge)));
    }

    #[tokio::test]
    async fn sms_challenge_delivers_code_and_masks_destination() {
        let h = harness();
        let challenge = h
            .service
            .enroll_destination("u1", FactorKind::Sms, "+1 555 123 4567")
            .await
            .unwrap();
        assert_eq!(challenge.kind, FactorKind::Sms);
        assert_eq!(challenge.destination_hint.as_deref(), Some("***-***-4567"));

        // Delivery is spawned; give it a beat
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let sent = h.notifier.sent.lock().await;
        let (kind, destination, code) = sent.first().expect("code was dispatched").clone();
        assert_eq!(kind, FactorKind::Sms);
        assert_eq!(destination, "+1 555 123 4567");
        drop(sent);

        h.service
            .verify(challenge.challenge_id, "u1", &code)
            .await
            .unwrap();

        let factors = h.service.list_factors("u1").await.unwrap();
        assert!(factors.iter().any(|f| f.kind == FactorKind::Sms && f.verified));
    }

    #[tokio::test]
    async fn expired_challenge_reports_expired_and_dies() {
        let h = harness();
        h.service.enroll_totp(&user()).await.unwrap();
        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::Totp))
            .await
            .unwrap();

        // Age the stored record past its window
        let mut record = h
            .store
            .find_challenge(challenge.challenge_id)
            .await
            .unwrap()
            .unwrap();
        record.expires_at = Utc::now() - Duration::seconds(1);
        h.store.put_challenge(record).await.unwrap();

        let result = h.service.verify(challenge.challenge_id, "u1", "123456").await;
        assert!(matches!(result, Err(MfaError::Expired)));
        let after = h.service.verify(challenge.challenge_id, "u1", "123456").await;
        assert!(matches!(after, Err(MfaError::InvalidChallenge)));
    }

    #[tokio::test]
    async fn backup_codes_are_single_use() {
        let h = harness();
        let enrollment = h.service.enroll_totp(&user()).await.unwrap();

        // Verify TOTP first so the backup factor is usable
        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::Totp))
            .await
            .unwrap();
        h.service
            .verify(challenge.challenge_id, "u1", &current_code(&enrollment.secret))
            .await
            .unwrap();

        let code = enrollment.backup_codes[0].clone();
        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::BackupCode))
            .await
            .unwrap();
        h.service
            .verify(challenge.challenge_id, "u1", &code)
            .await
            .unwrap();

        // The same backup code cannot be spent twice
        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::BackupCode))
            .await
            .unwrap();
        let result = h.service.verify(challenge.challenge_id, "u1", &code).await;
        assert!(matches!(result, Err(MfaError::InvalidCode { .. })));
    }

    #[tokio::test]
    async fn foreign_challenges_are_invisible() {
        let h = harness();
        h.service.enroll_totp(&user()).await.unwrap();
        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::Totp))
            .await
            .unwrap();

        let result = h.service.verify(challenge.challenge_id, "u2", "123456").await;
        assert!(matches!(result, Err(MfaError::InvalidChallenge)));
        let cancel = h.service.cancel(challenge.challenge_id, "u2").await;
        assert!(matches!(cancel, Err(MfaError::InvalidChallenge)));
    }

    #[tokio::test]
    async fn cancellation_removes_the_challenge() {
        let h = harness();
        h.service.enroll_totp(&user()).await.unwrap();
        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::Totp))
            .await
            .unwrap();

        h.service.cancel(challenge.challenge_id, "u1").await.unwrap();
        let result = h.service.verify(challenge.challenge_id, "u1", "123456").await;
        assert!(matches!(result, Err(MfaError::InvalidChallenge)));
    }

    #[tokio::test]
    async fn regenerated_backup_codes_invalidate_the_old_batch() {
        let h = harness();
        let enrollment = h.service.enroll_totp(&user()).await.unwrap();
        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::Totp))
            .await
            .unwrap();
        h.service
            .verify(challenge.challenge_id, "u1", &current_code(&enrollment.secret))
            .await
            .unwrap();

        let fresh = h.service.regenerate_backup_codes("u1").await.unwrap();
        assert_eq!(fresh.len(), 10);

        let challenge = h
            .service
            .create_challenge("u1", Some(FactorKind::BackupCode))
            .await
            .unwrap();
        let stale = h
            .service
            .verify(challenge.challenge_id, "u1", &enrollment.backup_codes[0])
            .await;
        assert!(matches!(stale, Err(MfaError::InvalidCode { .. })));
    }

    #[tokio::test]
    async fn disabling_an_unknown_factor_is_not_found() {
        let h = harness();
        let result = h.service.disable_factor("u1", Uuid::new_v4()).await;
        assert!(matches!(result, Err(MfaError::UnknownFactor)));
    }
}
