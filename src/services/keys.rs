//! Signing key lifecycle, JWKS publication, and JWT construction.
//!
//! A single key is the active signer at any time. Rotation generates a new
//! active key and stamps the old one with `not_after`; the old key stays in
//! the published JWKS for the configured overlap window so relying parties
//! can still verify outstanding tokens. Private material never leaves this
//! module except as PEM destined for the store.

use std::collections::HashMap;
use std::sync::RwLock;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header,
    Validation};
use rand::RngCore;
use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey},
    traits::PublicKeyParts,
    RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};

use crate::config::{Config, SigningAlg};
use crate::models::{ScopedClaims, User};
use crate::store::StoredSigningKey;

/// Public JWK entry as served from `/.well-known/jwks.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub alg: String,
    /// RSA modulus, base64url
    pub n: String,
    /// RSA exponent, base64url
    pub e: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// ID Token payload per OIDC Core §2, claims beyond the mandatory set
/// selected by scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub auth_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

/// Access token payload for the JWT profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    /// Space-separated scope list
    pub scope: String,
    pub jti: String,
}

/// One asymmetric signing key with its validity interval.
pub struct SigningKey {
    pub kid: String,
    pub alg: SigningAlg,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    pub not_before: DateTime<Utc>,
    /// Set once the key stops signing; publication continues until
    /// `not_after + overlap`
    pub not_after: Option<DateTime<Utc>>,
}

impl SigningKey {
    fn generate(kid: String, bits: usize) -> anyhow::Result<Self> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| anyhow::anyhow!("RSA key generation failed: {e}"))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            kid,
            alg: SigningAlg::Rs256,
            private_key,
            public_key,
            not_before: Utc::now(),
            not_after: None,
        })
    }

    fn from_stored(stored: &StoredSigningKey) -> anyhow::Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(&stored.private_key_pem)
            .map_err(|e| anyhow::anyhow!("invalid stored signing key {}: {e}", stored.kid))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            kid: stored.kid.clone(),
            alg: SigningAlg::parse(&stored.alg)?,
            private_key,
            public_key,
            not_before: stored.not_before,
            not_after: stored.not_after,
        })
    }

    fn private_key_pem(&self) -> anyhow::Result<String> {
        Ok(self
            .private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| anyhow::anyhow!("PEM export failed: {e}"))?
            .to_string())
    }

    fn encoding_key(&self) -> anyhow::Result<EncodingKey> {
        let pem = self.private_key_pem()?;
        EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("encoding key construction failed: {e}"))
    }

    fn decoding_key(&self) -> anyhow::Result<DecodingKey> {
        let pem = self
            .public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| anyhow::anyhow!("public PEM export failed: {e}"))?;
        DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("decoding key construction failed: {e}"))
    }

    fn to_jwk(&self) -> JsonWebKey {
        JsonWebKey {
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
            kid: self.kid.clone(),
            alg: self.alg.as_str().to_string(),
            n: URL_SAFE_NO_PAD.encode(self.public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(self.public_key.e().to_bytes_be()),
        }
    }

    /// Whether the key still belongs in the published JWKS.
    fn is_published(&self, now: DateTime<Utc>, overlap: Duration) -> bool {
        match self.not_after {
            None => true,
            Some(not_after) => now <= not_after + overlap,
        }
    }
}

struct KeyRing {
    keys: HashMap<String, SigningKey>,
    active_kid: String,
}

/// Owns the signing keys and everything JWT-shaped: ID Tokens, JWT access
/// tokens, and the published JWKS.
pub struct KeyManager {
    ring: RwLock<KeyRing>,
    issuer: String,
    key_bits: usize,
    access_token_ttl: Duration,
    rotation_period: Duration,
    overlap_window: Duration,
}

impl KeyManager {
    /// Create a manager with a freshly generated signing key.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        if config.signing_alg == SigningAlg::Es256 {
            anyhow::bail!("ES256 signing keys are not supported yet; configure RS256");
        }
        let key = SigningKey::generate(new_kid(), config.rsa_key_bits)?;
        let active_kid = key.kid.clone();
        let mut keys = HashMap::new();
        keys.insert(active_kid.clone(), key);
        Ok(Self {
            ring: RwLock::new(KeyRing { keys, active_kid }),
            issuer: config.issuer_url.clone(),
            key_bits: config.rsa_key_bits,
            access_token_ttl: Duration::seconds(config.access_token_ttl_secs),
            rotation_period: Duration::seconds(config.key_rotation_period_secs),
            overlap_window: Duration::seconds(config.key_overlap_window_secs),
        })
    }

    /// Rebuild a manager from persisted key material. The newest key without
    /// a `not_after` becomes the active signer.
    pub fn from_stored(config: &Config, stored: &[StoredSigningKey]) -> anyhow::Result<Self> {
        if config.signing_alg == SigningAlg::Es256 {
            anyhow::bail!("ES256 signing keys are not supported yet; configure RS256");
        }
        let mut keys = HashMap::new();
        let mut active: Option<(DateTime<Utc>, String)> = None;
        for entry in stored {
            let key = SigningKey::from_stored(entry)?;
            if key.not_after.is_none() {
                let candidate = (key.not_before, key.kid.clone());
                if active.as_ref().map_or(true, |a| candidate.0 > a.0) {
                    active = Some(candidate);
                }
            }
            keys.insert(key.kid.clone(), key);
        }
        let Some((_, active_kid)) = active else {
            anyhow::bail!("no active signing key among stored keys");
        };
        Ok(Self {
            ring: RwLock::new(KeyRing { keys, active_kid }),
            issuer: config.issuer_url.clone(),
            key_bits: config.rsa_key_bits,
            access_token_ttl: Duration::seconds(config.access_token_ttl_secs),
            rotation_period: Duration::seconds(config.key_rotation_period_secs),
            overlap_window: Duration::seconds(config.key_overlap_window_secs),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn active_kid(&self) -> String {
        self.ring.read().expect("key ring poisoned").active_kid.clone()
    }

    /// Snapshot of all keys as persistable records.
    pub fn stored_keys(&self) -> anyhow::Result<Vec<StoredSigningKey>> {
        let ring = self.ring.read().expect("key ring poisoned");
        ring.keys
            .values()
            .map(|key| {
                Ok(StoredSigningKey {
                    kid: key.kid.clone(),
                    alg: key.alg.as_str().to_string(),
                    private_key_pem: key.private_key_pem()?,
                    not_before: key.not_before,
                    not_after: key.not_after,
                })
            })
            .collect()
    }

    /// Published key set: the active key plus retired keys still inside the
    /// overlap window. Keys past the window are pruned on the way out.
    pub fn jwks(&self) -> JsonWebKeySet {
        let now = Utc::now();
        let mut ring = self.ring.write().expect("key ring poisoned");
        let overlap = self.overlap_window;
        let active = ring.active_kid.clone();
        ring.keys
            .retain(|kid, key| *kid == active || key.is_published(now, overlap));

        let mut keys: Vec<JsonWebKey> = ring
            .keys
            .values()
            .filter(|k| k.is_published(now, overlap))
            .map(SigningKey::to_jwk)
            .collect();
        keys.sort_by(|a, b| a.kid.cmp(&b.kid));
        JsonWebKeySet { keys }
    }

    /// Retire the active key and promote a fresh one.
    pub fn rotate(&self) -> anyhow::Result<String> {
        let replacement = SigningKey::generate(new_kid(), self.key_bits)?;
        let new_kid = replacement.kid.clone();

        let mut ring = self.ring.write().expect("key ring poisoned");
        let old_kid = ring.active_kid.clone();
        if let Some(old) = ring.keys.get_mut(&old_kid) {
            old.not_after = Some(Utc::now());
        }
        ring.active_kid = new_kid.clone();
        ring.keys.insert(new_kid.clone(), replacement);
        Ok(new_kid)
    }

    /// Rotate when the active key is older than the rotation period.
    pub fn rotate_if_due(&self) -> anyhow::Result<Option<String>> {
        let due = {
            let ring = self.ring.read().expect("key ring poisoned");
            ring.keys
                .get(&ring.active_kid)
                .map_or(true, |key| Utc::now() - key.not_before >= self.rotation_period)
        };
        if due {
            self.rotate().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Build and sign an ID Token for a completed authentication.
    pub fn sign_id_token(
        &self,
        user: &User,
        client_id: &str,
        scopes: &[String],
        nonce: Option<&str>,
        auth_time: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let now = Utc::now();
        let scoped = ScopedClaims::for_scopes(user, scopes);
        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: user.sub.clone(),
            aud: client_id.to_string(),
            exp: (now + self.access_token_ttl).timestamp(),
            iat: now.timestamp(),
            auth_time: auth_time.timestamp(),
            nonce: nonce.map(str::to_string),
            name: scoped.name,
            picture: scoped.picture,
            email: scoped.email,
            email_verified: scoped.email_verified,
        };
        self.sign(&claims)
    }

    /// Sign JWT access-token claims with the active key.
    pub fn sign_access_claims(&self, claims: &AccessTokenClaims) -> anyhow::Result<String> {
        self.sign(claims)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> anyhow::Result<String> {
        let ring = self.ring.read().expect("key ring poisoned");
        let key = ring
            .keys
            .get(&ring.active_kid)
            .ok_or_else(|| anyhow::anyhow!("active signing key missing"))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        encode(&header, claims, &key.encoding_key()?)
            .map_err(|e| anyhow::anyhow!("JWT signing failed: {e}"))
    }

    /// Verify a JWT access token: signature by `kid`, issuer, and expiry.
    /// Audience varies per client, so the caller checks it against the
    /// token record.
    pub fn verify_access_token(&self, token: &str) -> anyhow::Result<AccessTokenClaims> {
        let header = decode_header(token).map_err(|e| anyhow::anyhow!("bad JWT header: {e}"))?;
        let kid = header
            .kid
            .ok_or_else(|| anyhow::anyhow!("JWT header missing kid"))?;

        let decoding_key = {
            let ring = self.ring.read().expect("key ring poisoned");
            let key = ring
                .keys
                .get(&kid)
                .ok_or_else(|| anyhow::anyhow!("unknown signing key: {kid}"))?;
            key.decoding_key()?
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;

        let data = decode::<AccessTokenClaims>(token, &decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("JWT verification failed: {e}"))?;
        Ok(data.claims)
    }
}

fn new_kid() -> String {
    let mut suffix = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut suffix);
    format!("key-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), hex::encode(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn manager() -> KeyManager {
        KeyManager::new(&test_config()).unwrap()
    }

    fn sample_user() -> User {
        User {
            sub: "u1".to_string(),
            email: "u1@example.com".to_string(),
            email_verified: true,
            name: Some("User One".to_string()),
            picture: None,
        }
    }

    #[test]
    fn es256_is_rejected_at_construction() {
        let mut config = test_config();
        config.signing_alg = SigningAlg::Es256;
        assert!(KeyManager::new(&config).is_err());
    }

    #[test]
    fn jwks_publishes_active_key_public_parts_only() {
        let manager = manager();
        let jwks = manager.jwks();
        assert_eq!(jwks.keys.len(), 1);
        let jwk = &jwks.keys[0];
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.key_use, "sig");
        assert_eq!(jwk.alg, "RS256");
        assert_eq!(jwk.kid, manager.active_kid());
        assert!(!jwk.n.is_empty());
        // The JWKS JSON must never contain private material
        let json = serde_json::to_string(&jwks).unwrap();
        assert!(!json.contains("PRIVATE KEY"));
        assert!(!json.contains("\"d\""));
    }

    #[test]
    fn id_token_claims_follow_scopes() {
        let manager = manager();
        let auth_time = Utc::now() - Duration::seconds(5);
        let token = manager
            .sign_id_token(
                &sample_user(),
                "demo",
                &["openid".to_string(), "email".to_string()],
                Some("n-0S6_WzA2Mj"),
                auth_time,
            )
            .unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.unwrap(), manager.active_kid());

        // Decode through the public JWKS path the way a relying party would
        let claims = verify_id_token(&manager, &token);
        assert_eq!(claims.iss, "https://auth.example");
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.aud, "demo");
        assert_eq!(claims.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
        assert_eq!(claims.auth_time, auth_time.timestamp());
        assert_eq!(claims.email.as_deref(), Some("u1@example.com"));
        assert_eq!(claims.email_verified, Some(true));
        // profile scope was not granted
        assert!(claims.name.is_none());
        assert!(claims.iat <= Utc::now().timestamp());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn access_token_roundtrip() {
        let manager = manager();
        let claims = AccessTokenClaims {
            iss: "https://auth.example".to_string(),
            sub: "u1".to_string(),
            aud: "demo".to_string(),
            exp: (Utc::now() + Duration::seconds(3600)).timestamp(),
            iat: Utc::now().timestamp(),
            scope: "openid profile".to_string(),
            jti: "jti-1".to_string(),
        };
        let token = manager.sign_access_claims(&claims).unwrap();
        let verified = manager.verify_access_token(&token).unwrap();
        assert_eq!(verified.jti, "jti-1");
        assert_eq!(verified.scope, "openid profile");
    }

    #[test]
    fn rotation_keeps_old_key_verifiable_within_overlap() {
        let manager = manager();
        let claims = AccessTokenClaims {
            iss: "https://auth.example".to_string(),
            sub: "u1".to_string(),
            aud: "demo".to_string(),
            exp: (Utc::now() + Duration::seconds(3600)).timestamp(),
            iat: Utc::now().timestamp(),
            scope: "openid".to_string(),
            jti: "jti-2".to_string(),
        };
        let old_kid = manager.active_kid();
        let token = manager.sign_access_claims(&claims).unwrap();

        let new_kid = manager.rotate().unwrap();
        assert_ne!(old_kid, new_kid);
        assert_eq!(manager.active_kid(), new_kid);

        // Both keys published during the overlap window
        let kids: Vec<String> = manager.jwks().keys.iter().map(|k| k.kid.clone()).collect();
        assert!(kids.contains(&old_kid));
        assert!(kids.contains(&new_kid));

        // Token signed before rotation still verifies
        assert!(manager.verify_access_token(&token).is_ok());
    }

    #[test]
    fn tampered_token_fails_verification() {
        let manager = manager();
        let claims = AccessTokenClaims {
            iss: "https://auth.example".to_string(),
            sub: "u1".to_string(),
            aud: "demo".to_string(),
            exp: (Utc::now() + Duration::seconds(3600)).timestamp(),
            iat: Utc::now().timestamp(),
            scope: "openid".to_string(),
            jti: "jti-3".to_string(),
        };
        let token = manager.sign_access_claims(&claims).unwrap();
        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('A') { 'B' } else { 'A' });
        assert!(manager.verify_access_token(&tampered).is_err());
    }

    #[test]
    fn stored_keys_roundtrip() {
        let manager = manager();
        let stored = manager.stored_keys().unwrap();
        assert_eq!(stored.len(), 1);

        let restored = KeyManager::from_stored(&test_config(), &stored).unwrap();
        assert_eq!(restored.active_kid(), manager.active_kid());
    }

    fn verify_id_token(manager: &KeyManager, token: &str) -> IdTokenClaims {
        let header = decode_header(token).unwrap();
        let kid = header.kid.unwrap();
        let jwks = manager.jwks();
        let jwk = jwks.keys.iter().find(|k| k.kid == kid).unwrap();
        let decoding_key =
            DecodingKey::from_rsa_components(&jwk.n, &jwk.e).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&["https://auth.example"]);
        validation.set_audience(&["demo"]);
        decode::<IdTokenClaims>(token, &decoding_key, &validation)
            .unwrap()
            .claims
    }
}
