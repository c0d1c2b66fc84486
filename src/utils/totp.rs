//! TOTP per RFC 6238: HMAC-SHA1 over a 30-second counter with dynamic
//! truncation to 6 digits. Verification accepts the current window plus one
//! step of clock drift in either direction.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

pub const TOTP_DIGITS: u32 = 6;
pub const TOTP_PERIOD: u64 = 30;

/// Accepted clock drift, in steps, on either side of the current window
pub const TOTP_SKEW_STEPS: i64 = 1;

/// Secret size in bytes (160 bits, the HMAC-SHA1 block-native size)
pub const TOTP_SECRET_BYTES: usize = 20;

const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Generate a fresh base32-encoded TOTP secret.
pub fn generate_secret() -> String {
    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut bytes = [0u8; TOTP_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    base32_encode(&bytes)
}

/// Build the otpauth:// provisioning URI consumed by authenticator apps.
pub fn provisioning_uri(issuer: &str, account: &str, secret_base32: &str) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&digits={}&period={}",
        urlencoding::encode(issuer),
        urlencoding::encode(account),
        secret_base32,
        urlencoding::encode(issuer),
        TOTP_DIGITS,
        TOTP_PERIOD
    )
}

/// Verify a submitted code against the secret at the given Unix time,
/// accepting ±`TOTP_SKEW_STEPS` windows.
pub fn verify_code(secret_base32: &str, code: &str, unix_time: u64) -> Result<bool, anyhow::Error> {
    for offset in -TOTP_SKEW_STEPS..=TOTP_SKEW_STEPS {
        let shifted = unix_time as i64 + offset * TOTP_PERIOD as i64;
        if shifted < 0 {
            continue;
        }
        let expected = code_at(secret_base32, shifted as u64)?;
        if bool::from(expected.as_bytes().ct_eq(code.as_bytes())) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Code for the exact window containing `unix_time`, no drift.
pub fn code_at(secret_base32: &str, unix_time: u64) -> Result<String, anyhow::Error> {
    let secret = base32_decode(secret_base32)?;
    hotp(&secret, unix_time / TOTP_PERIOD)
}

/// HOTP (RFC 4226) with HMAC-SHA1 and dynamic truncation.
fn hotp(secret: &[u8], counter: u64) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("HMAC key error: {e}"))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0F) as usize;
    let binary = u32::from_be_bytes(
        digest[offset..offset + 4]
            .try_into()
            .map_err(|_| anyhow::anyhow!("truncation out of range"))?,
    ) & 0x7FFF_FFFF;

    let otp = binary % 10u32.pow(TOTP_DIGITS);
    Ok(format!("{otp:0>width$}", width = TOTP_DIGITS as usize))
}

pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1F) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize] as char);
    }
    out
}

pub fn base32_decode(encoded: &str) -> Result<Vec<u8>, anyhow::Error> {
    let mut out = Vec::with_capacity(encoded.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for c in encoded.chars().filter(|c| *c != '=') {
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a as char == c.to_ascii_uppercase())
            .ok_or_else(|| anyhow::anyhow!("invalid base32 character"))?;
        buffer = (buffer << 5) | value as u64;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // RFC 6238 Appendix B reference secret: ASCII "12345678901234567890"
    const RFC_SECRET_B32: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn rfc6238_reference_vectors() {
        // (time, expected 6-digit truncation of the published 8-digit vectors)
        for (t, expected) in [
            (59u64, "287082"),
            (1_111_111_109, "081804"),
            (1_234_567_890, "005924"),
            (2_000_000_000, "279037"),
        ] {
            assert_eq!(code_at(RFC_SECRET_B32, t).unwrap(), expected, "t={t}");
        }
    }

    #[test]
    fn accepts_adjacent_windows_only() {
        let now = 1_111_111_109u64;
        let prev = code_at(RFC_SECRET_B32, now - TOTP_PERIOD).unwrap();
        let next = code_at(RFC_SECRET_B32, now + TOTP_PERIOD).unwrap();
        let two_behind = code_at(RFC_SECRET_B32, now - 2 * TOTP_PERIOD).unwrap();

        assert!(verify_code(RFC_SECRET_B32, &prev, now).unwrap());
        assert!(verify_code(RFC_SECRET_B32, &next, now).unwrap());
        assert!(!verify_code(RFC_SECRET_B32, &two_behind, now).unwrap());
    }

    #[test]
    fn rejects_wrong_code() {
        assert!(!verify_code(RFC_SECRET_B32, "000000", 59).unwrap());
    }

    #[test]
    fn provisioning_uri_contains_secret_and_issuer() {
        let uri = provisioning_uri("auth.example", "u1@example.com", "JBSWY3DPEHPK3PXP");
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(uri.contains("issuer=auth.example"));
        assert!(uri.contains("period=30"));
    }

    #[test]
    fn generated_secret_is_160_bits_of_base32() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32); // 20 bytes -> 32 base32 chars
        assert_eq!(base32_decode(&secret).unwrap().len(), TOTP_SECRET_BYTES);
    }

    proptest! {
        #[test]
        fn base32_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let encoded = base32_encode(&data);
            prop_assert_eq!(base32_decode(&encoded).unwrap(), data);
        }
    }
}
