use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported second-factor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    Totp,
    Sms,
    Email,
    BackupCode,
    Webauthn,
}

impl FactorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactorKind::Totp => "totp",
            FactorKind::Sms => "sms",
            FactorKind::Email => "email",
            FactorKind::BackupCode => "backup_code",
            FactorKind::Webauthn => "webauthn",
        }
    }

    /// Kinds that deliver a one-off code through the notifier
    pub fn is_deliverable(&self) -> bool {
        matches!(self, FactorKind::Sms | FactorKind::Email)
    }
}

impl std::fmt::Display for FactorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A second factor registered for a user.
///
/// Lifecycle: unverified -> verified -> enabled <-> disabled. A factor only
/// counts towards MFA protection once it is both enabled and verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaFactor {
    pub id: Uuid,
    pub user_id: String,
    pub kind: FactorKind,
    pub enabled: bool,
    pub verified: bool,
    /// Base32 TOTP secret (totp factors only)
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    /// Phone number or email address (sms/email factors only)
    pub destination: Option<String>,
    /// SHA-256 hashes of unused backup codes (backup_code factors only)
    #[serde(skip_serializing)]
    pub backup_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl MfaFactor {
    pub fn is_usable(&self) -> bool {
        self.enabled && self.verified
    }

    /// Masked destination shown to the user, e.g. `***-***-1234` or `a***@example.com`
    pub fn destination_hint(&self) -> Option<String> {
        let dest = self.destination.as_deref()?;
        Some(match self.kind {
            FactorKind::Sms => {
                let digits: String = dest.chars().filter(|c| c.is_ascii_digit()).collect();
                let tail = &digits[digits.len().saturating_sub(4)..];
                format!("***-***-{tail}")
            }
            FactorKind::Email => match dest.split_once('@') {
                Some((local, domain)) => {
                    let first = local.chars().next().unwrap_or('*');
                    format!("{first}***@{domain}")
                }
                None => "***".to_string(),
            },
            _ => "***".to_string(),
        })
    }
}

/// A pending one-shot verification attempt against a factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaChallenge {
    pub id: Uuid,
    pub user_id: String,
    pub factor_id: Uuid,
    pub kind: FactorKind,
    /// SHA-256 hash of the delivered code; absent for totp and backup codes,
    /// which are checked against the factor itself
    #[serde(skip_serializing)]
    pub code_hash: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl MfaChallenge {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_locked(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(kind: FactorKind, destination: &str) -> MfaFactor {
        MfaFactor {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            kind,
            enabled: true,
            verified: true,
            secret: None,
            destination: Some(destination.to_string()),
            backup_codes: Vec::new(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn sms_hint_masks_all_but_last_four_digits() {
        let f = factor(FactorKind::Sms, "+1 (555) 123-4567");
        assert_eq!(f.destination_hint().unwrap(), "***-***-4567");
    }

    #[test]
    fn email_hint_keeps_first_char_and_domain() {
        let f = factor(FactorKind::Email, "alice@example.com");
        assert_eq!(f.destination_hint().unwrap(), "a***@example.com");
    }
}
