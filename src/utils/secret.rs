//! Generation and at-rest hashing of credentials.
//!
//! Codes and tokens are high-entropy random strings hashed with SHA-256
//! before storage (fast lookup, no salt needed for unique random inputs).
//! Client secrets are long-lived and low-ish entropy by comparison, so they
//! go through bcrypt instead.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Bytes of entropy behind every code and token (256 bits)
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// Default length for generated client secrets
pub const CLIENT_SECRET_LENGTH: usize = 48;

/// bcrypt cost factor for client secret hashing
pub const BCRYPT_COST: u32 = 12;

const SECRET_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate an opaque token/code with 256 bits of entropy, URL-safe.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a random client secret.
pub fn generate_client_secret() -> String {
    let mut rng = OsRng;
    (0..CLIENT_SECRET_LENGTH)
        .map(|_| {
            let idx = (rng.next_u32() as usize) % SECRET_CHARSET.len();
            SECRET_CHARSET[idx] as char
        })
        .collect()
}

/// Generate a 6-digit numeric code for sms/email challenges.
pub fn generate_numeric_code() -> String {
    let mut rng = OsRng;
    let n = rng.next_u32() % 1_000_000;
    format!("{n:06}")
}

/// SHA-256 hash of a token, base64url-encoded, for storage and lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Verify a plaintext token against a stored SHA-256 hash in constant time.
pub fn verify_token_hash(token: &str, stored_hash: &str) -> bool {
    let computed = hash_token(token);
    constant_time_eq(&computed, stored_hash)
}

/// bcrypt-hash a client secret for storage.
pub fn hash_client_secret(secret: &str) -> Result<String, anyhow::Error> {
    bcrypt::hash(secret, BCRYPT_COST).map_err(|e| anyhow::anyhow!("secret hashing failed: {e}"))
}

/// Verify a presented client secret against the stored bcrypt hash.
pub fn verify_client_secret(secret: &str, hash: &str) -> Result<bool, anyhow::Error> {
    bcrypt::verify(secret, hash).map_err(|e| anyhow::anyhow!("secret verification failed: {e}"))
}

/// Constant-time string equality.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn generated_tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        // 32 bytes encode to 43 unpadded base64url characters
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn numeric_codes_are_six_digits() {
        for _ in 0..32 {
            let code = generate_numeric_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn token_hash_is_deterministic_and_distinct_from_input() {
        let token = generate_token();
        let h1 = hash_token(&token);
        let h2 = hash_token(&token);
        assert_eq!(h1, h2);
        assert_ne!(h1, token);
        assert!(verify_token_hash(&token, &h1));
        assert!(!verify_token_hash(&generate_token(), &h1));
    }

    #[test]
    fn client_secret_roundtrip() {
        let secret = generate_client_secret();
        assert_eq!(secret.len(), CLIENT_SECRET_LENGTH);
        let hash = hash_client_secret(&secret).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_client_secret(&secret, &hash).unwrap());
        assert!(!verify_client_secret("not-the-secret", &hash).unwrap());
    }

    proptest! {
        #[test]
        fn constant_time_eq_agrees_with_eq(a in ".{0,64}", b in ".{0,64}") {
            prop_assert_eq!(constant_time_eq(&a, &b), a == b);
        }
    }
}
