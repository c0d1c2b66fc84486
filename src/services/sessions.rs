//! The login collaborator seam.
//!
//! The core never authenticates end-users itself; it resolves an opaque
//! session token into an already-authenticated subject. How the session got
//! established (password + KDF, SSO, passkey) is the collaborator's
//! business.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::User;

/// An authenticated end-user session as reported by the login collaborator.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub user: User,
    /// When the subject last actively authenticated
    pub auth_time: DateTime<Utc>,
    /// Whether the subject completed an MFA challenge in this session
    pub mfa_passed: bool,
}

#[async_trait]
pub trait LoginSessions: Send + Sync {
    /// Resolve an opaque session token to its subject, if the session is live.
    async fn resolve(&self, session_token: &str) -> Option<AuthenticatedSession>;

    /// Record that the session completed an MFA challenge.
    async fn mark_mfa_passed(&self, session_token: &str);
}

/// Pull the session token off a request: `session` cookie first, then the
/// `x-session-token` header.
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == "session" {
                    return Some(value.to_string());
                }
            }
        }
    }
    headers
        .get("x-session-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// In-memory session source for development and tests.
#[derive(Default)]
pub struct MemorySessions {
    sessions: RwLock<HashMap<String, AuthenticatedSession>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token: impl Into<String>, session: AuthenticatedSession) {
        self.sessions.write().await.insert(token.into(), session);
    }
}

#[async_trait]
impl LoginSessions for MemorySessions {
    async fn resolve(&self, session_token: &str) -> Option<AuthenticatedSession> {
        self.sessions.read().await.get(session_token).cloned()
    }

    async fn mark_mfa_passed(&self, session_token: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(session_token) {
            session.mfa_passed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_takes_precedence_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=tok-cookie"),
        );
        headers.insert("x-session-token", HeaderValue::from_static("tok-header"));
        assert_eq!(
            session_token_from_headers(&headers).as_deref(),
            Some("tok-cookie")
        );
    }

    #[test]
    fn header_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-token", HeaderValue::from_static("tok-header"));
        assert_eq!(
            session_token_from_headers(&headers).as_deref(),
            Some("tok-header")
        );
        assert_eq!(session_token_from_headers(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn memory_sessions_resolve_and_upgrade() {
        let sessions = MemorySessions::new();
        sessions
            .insert(
                "tok",
                AuthenticatedSession {
                    user: User {
                        sub: "u1".to_string(),
                        email: "u1@example.com".to_string(),
                        email_verified: true,
                        name: None,
                        picture: None,
                    },
                    auth_time: Utc::now(),
                    mfa_passed: false,
                },
            )
            .await;

        assert!(!sessions.resolve("tok").await.unwrap().mfa_passed);
        sessions.mark_mfa_passed("tok").await;
        assert!(sessions.resolve("tok").await.unwrap().mfa_passed);
        assert!(sessions.resolve("other").await.is_none());
    }
}
