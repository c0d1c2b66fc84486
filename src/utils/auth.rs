//! Client credential extraction for the token, introspection, and
//! revocation endpoints.
//!
//! Two authentication methods are accepted: `client_secret_basic` (HTTP
//! Basic header, RFC 6749 §2.3.1 with form-urlencoded credentials) and
//! `client_secret_post` (body parameters). Presenting a secret through both
//! channels at once is rejected. Public clients present only a `client_id`.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::OAuthError;

/// Credentials presented by a client on a token-style endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    /// None for public clients
    pub client_secret: Option<String>,
}

/// Pull client credentials out of the Authorization header and/or the form
/// body. Fails with `invalid_request` when the secret arrives through both
/// channels or when no client identity is present at all.
pub fn extract_client_credentials(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<ClientCredentials, OAuthError> {
    let basic = parse_basic_header(headers)?;

    match (basic, form_client_secret) {
        (Some(_), Some(_)) => Err(OAuthError::InvalidRequest(
            "client authenticated through more than one method".to_string(),
        )),
        (Some((basic_id, basic_secret)), None) => {
            // A body client_id may accompany Basic auth but must agree with it
            if let Some(form_id) = form_client_id {
                if form_id != basic_id {
                    return Err(OAuthError::InvalidRequest(
                        "client_id does not match Authorization header".to_string(),
                    ));
                }
            }
            Ok(ClientCredentials {
                client_id: basic_id,
                client_secret: Some(basic_secret),
            })
        }
        (None, secret) => {
            let client_id = form_client_id
                .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".to_string()))?;
            Ok(ClientCredentials {
                client_id: client_id.to_string(),
                client_secret: secret.map(str::to_string),
            })
        }
    }
}

/// Parse `Authorization: Basic <base64(id:secret)>`, if present.
fn parse_basic_header(headers: &HeaderMap) -> Result<Option<(String, String)>, OAuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| OAuthError::InvalidRequest("malformed Authorization header".to_string()))?;
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Ok(None);
    };

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| OAuthError::InvalidClient)?;
    let decoded = String::from_utf8(decoded).map_err(|_| OAuthError::InvalidClient)?;
    let (id, secret) = decoded.split_once(':').ok_or(OAuthError::InvalidClient)?;

    // Credentials are form-urlencoded inside the header per RFC 6749 §2.3.1
    let id = urlencoding::decode(id).map_err(|_| OAuthError::InvalidClient)?;
    let secret = urlencoding::decode(secret).map_err(|_| OAuthError::InvalidClient)?;

    Ok(Some((id.into_owned(), secret.into_owned())))
}

/// Extract a Bearer token from the Authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic_header(id: &str, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode(format!("{id}:{secret}"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    #[test]
    fn basic_auth_is_parsed() {
        let creds = extract_client_credentials(&basic_header("demo", "s3cret"), None, None).unwrap();
        assert_eq!(creds.client_id, "demo");
        assert_eq!(creds.client_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn post_auth_is_parsed() {
        let creds =
            extract_client_credentials(&HeaderMap::new(), Some("demo"), Some("s3cret")).unwrap();
        assert_eq!(creds.client_id, "demo");
        assert_eq!(creds.client_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn public_client_has_no_secret() {
        let creds = extract_client_credentials(&HeaderMap::new(), Some("spa"), None).unwrap();
        assert_eq!(creds.client_secret, None);
    }

    #[test]
    fn both_methods_at_once_is_invalid_request() {
        let err = extract_client_credentials(&basic_header("demo", "a"), Some("demo"), Some("b"))
            .unwrap_err();
        assert!(matches!(err, OAuthError::InvalidRequest(_)));
    }

    #[test]
    fn mismatched_client_ids_are_rejected() {
        let err =
            extract_client_credentials(&basic_header("demo", "a"), Some("other"), None).unwrap_err();
        assert!(matches!(err, OAuthError::InvalidRequest(_)));
    }

    #[test]
    fn missing_identity_is_invalid_request() {
        let err = extract_client_credentials(&HeaderMap::new(), None, None).unwrap_err();
        assert!(matches!(err, OAuthError::InvalidRequest(_)));
    }

    #[test]
    fn urlencoded_basic_credentials_are_decoded() {
        let creds =
            extract_client_credentials(&basic_header("demo%2Bapp", "p%40ss"), None, None).unwrap();
        assert_eq!(creds.client_id, "demo+app");
        assert_eq!(creds.client_secret.as_deref(), Some("p@ss"));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi"));
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }
}
