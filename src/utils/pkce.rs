//! PKCE (Proof Key for Code Exchange) verification per RFC 7636.
//!
//! The authorization endpoint captures a `code_challenge` and method; the
//! token endpoint proves possession of the matching `code_verifier` before a
//! code may be redeemed. Public clients must always present a challenge.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// code_verifier length bounds per RFC 7636 §4.1
pub const CODE_VERIFIER_MIN_LENGTH: usize = 43;
pub const CODE_VERIFIER_MAX_LENGTH: usize = 128;

pub const PKCE_METHOD_S256: &str = "S256";
pub const PKCE_METHOD_PLAIN: &str = "plain";

/// Check whether a challenge method is one we accept.
pub fn is_supported_method(method: &str) -> bool {
    method == PKCE_METHOD_S256 || method == PKCE_METHOD_PLAIN
}

/// Verify a `code_verifier` against the stored challenge under the stored
/// method. Unknown methods never verify.
pub fn verify_pkce(code_verifier: &str, code_challenge: &str, method: &str) -> bool {
    match method {
        PKCE_METHOD_S256 => {
            let computed = compute_s256_challenge(code_verifier);
            bool::from(computed.as_bytes().ct_eq(code_challenge.as_bytes()))
        }
        PKCE_METHOD_PLAIN => bool::from(code_verifier.as_bytes().ct_eq(code_challenge.as_bytes())),
        _ => false,
    }
}

/// S256: challenge = BASE64URL-ENCODE(SHA256(ASCII(code_verifier))), no padding.
pub fn compute_s256_challenge(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Validate `code_verifier` format: 43-128 characters from the unreserved
/// set `[A-Za-z0-9-._~]`.
pub fn validate_code_verifier(verifier: &str) -> bool {
    let len = verifier.len();
    if !(CODE_VERIFIER_MIN_LENGTH..=CODE_VERIFIER_MAX_LENGTH).contains(&len) {
        return false;
    }
    verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// Validate `code_challenge` format for the given method.
///
/// An S256 challenge is always 43 base64url characters (32 hashed bytes);
/// a plain challenge obeys the verifier grammar since it *is* the verifier.
pub fn validate_code_challenge(challenge: &str, method: &str) -> bool {
    match method {
        PKCE_METHOD_S256 => {
            challenge.len() == 43
                && challenge
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        PKCE_METHOD_PLAIN => validate_code_verifier(challenge),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // RFC 7636 Appendix B reference pair
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn s256_reference_pair_verifies() {
        assert_eq!(compute_s256_challenge(VERIFIER), CHALLENGE);
        assert!(verify_pkce(VERIFIER, CHALLENGE, "S256"));
    }

    #[test]
    fn s256_rejects_wrong_verifier() {
        assert!(!verify_pkce(
            "wrong_verifier_that_is_long_enough_to_pass_checks",
            CHALLENGE,
            "S256"
        ));
    }

    #[test]
    fn plain_compares_verbatim() {
        let v = "a_plain_verifier_that_is_at_least_43_chars_long";
        assert!(verify_pkce(v, v, "plain"));
        assert!(!verify_pkce(v, CHALLENGE, "plain"));
    }

    #[test]
    fn unknown_method_never_verifies() {
        assert!(!verify_pkce(VERIFIER, CHALLENGE, "S512"));
        assert!(!is_supported_method("S512"));
    }

    #[test]
    fn verifier_length_bounds() {
        assert!(!validate_code_verifier(&"a".repeat(42)));
        assert!(validate_code_verifier(&"a".repeat(43)));
        assert!(validate_code_verifier(&"a".repeat(128)));
        assert!(!validate_code_verifier(&"a".repeat(129)));
    }

    #[test]
    fn verifier_rejects_reserved_characters() {
        for bad in ['+', '/', '=', ' ', '!'] {
            let v = format!("{}{}", "a".repeat(43), bad);
            assert!(!validate_code_verifier(&v), "accepted {bad:?}");
        }
    }

    #[test]
    fn challenge_format_by_method() {
        assert!(validate_code_challenge(CHALLENGE, "S256"));
        assert!(!validate_code_challenge(&CHALLENGE[..40], "S256"));
        assert!(validate_code_challenge(VERIFIER, "plain"));
        assert!(!validate_code_challenge(CHALLENGE, "S512"));
    }

    proptest! {
        #[test]
        fn any_valid_verifier_matches_its_own_s256_challenge(
            v in "[A-Za-z0-9._~-]{43,128}"
        ) {
            let challenge = compute_s256_challenge(&v);
            prop_assert!(validate_code_verifier(&v));
            prop_assert!(validate_code_challenge(&challenge, "S256"));
            prop_assert!(verify_pkce(&v, &challenge, "S256"));
        }

        #[test]
        fn distinct_verifiers_do_not_cross_verify(
            a in "[A-Za-z0-9._~-]{43,64}",
            b in "[A-Za-z0-9._~-]{43,64}"
        ) {
            prop_assume!(a != b);
            let challenge = compute_s256_challenge(&a);
            prop_assert!(!verify_pkce(&b, &challenge, "S256"));
        }
    }
}
