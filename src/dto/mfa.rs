//! MFA enrolment and challenge DTOs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::FactorKind;

/// Body of POST /mfa/enroll for sms/email factors.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollFactorRequest {
    pub kind: FactorKind,
    /// Phone number or email address the codes go to
    pub destination: String,
}

/// Response to POST /mfa/totp/enroll. The secret and backup codes appear
/// here once and are never retrievable again.
#[derive(Debug, Clone, Serialize)]
pub struct TotpEnrollResponse {
    pub factor_id: Uuid,
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

/// Body of POST /mfa/challenge.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeRequest {
    /// Preferred factor kind; the orchestrator picks otherwise
    pub kind: Option<FactorKind>,
}

/// A pending challenge handed back to the caller. Destinations are masked.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeResponse {
    pub challenge_id: Uuid,
    pub kind: FactorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_hint: Option<String>,
}

/// Body of POST /mfa/verify.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyChallengeRequest {
    pub challenge_id: Uuid,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyChallengeResponse {
    pub status: &'static str,
}

/// Response to POST /mfa/backup-codes/regenerate.
#[derive(Debug, Clone, Serialize)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}

/// One factor in GET /mfa/factors. Secrets and code hashes never leave the
/// server; this is the full extent of what a caller sees.
#[derive(Debug, Clone, Serialize)]
pub struct FactorInfo {
    pub id: Uuid,
    pub kind: FactorKind,
    pub enabled: bool,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_hint: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&crate::models::MfaFactor> for FactorInfo {
    fn from(factor: &crate::models::MfaFactor) -> Self {
        Self {
            id: factor.id,
            kind: factor.kind,
            enabled: factor.enabled,
            verified: factor.verified,
            destination_hint: factor.destination_hint(),
            created_at: factor.created_at,
            last_used_at: factor.last_used_at,
        }
    }
}
