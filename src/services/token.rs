//! Access and refresh token lifecycle: minting, validation, introspection
//! (RFC 7662), and revocation (RFC 7009).

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::OAuthError;
use crate::models::{AccessTokenRecord, Client, RefreshTokenRecord};
use crate::services::keys::{AccessTokenClaims, KeyManager};
use crate::store::{RotationOutcome, Store};
use crate::utils::secret::{generate_token, hash_token};

/// RFC 7662 introspection response. For anything but a live token the body
/// is `{"active": false}` and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            sub: None,
            exp: None,
            iat: None,
            token_type: None,
        }
    }
}

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn Store>,
    keys: Arc<KeyManager>,
    config: Arc<Config>,
}

impl TokenService {
    pub fn new(store: Arc<dyn Store>, keys: Arc<KeyManager>, config: Arc<Config>) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    /// Mint a JWT access token and its backing record.
    pub async fn mint_access(
        &self,
        client: &Client,
        subject: Option<&str>,
        scopes: &[String],
        refresh_id: Option<Uuid>,
    ) -> Result<(String, AccessTokenRecord), OAuthError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.access_token_ttl_secs);

        let claims = AccessTokenClaims {
            iss: self.keys.issuer().to_string(),
            sub: subject.unwrap_or(&client.client_id).to_string(),
            aud: client.client_id.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            scope: scopes.join(" "),
            jti: id.to_string(),
        };
        let token = self
            .keys
            .sign_access_claims(&claims)
            .map_err(OAuthError::ServerError)?;

        let record = AccessTokenRecord {
            id,
            token_hash: hash_token(&token),
            client_id: client.client_id.clone(),
            subject: subject.map(str::to_string),
            scopes: scopes.to_vec(),
            issued_at: now,
            expires_at,
            refresh_id,
            revoked: false,
        };
        self.store
            .put_access_token(record.clone())
            .await
            .map_err(OAuthError::ServerError)?;

        Ok((token, record))
    }

    /// Mint an opaque refresh token starting a new rotation chain.
    pub async fn mint_refresh(
        &self,
        client: &Client,
        subject: &str,
        scopes: &[String],
    ) -> Result<(String, RefreshTokenRecord), OAuthError> {
        let (token, record) = self.build_refresh(client, subject, scopes, None);
        self.store
            .put_refresh_token(record.clone())
            .await
            .map_err(OAuthError::ServerError)?;
        Ok((token, record))
    }

    /// Rotate `old` into a fresh token on the same chain, preserving the
    /// absolute expiry. The store-level check-and-set decides the winner
    /// under concurrency; a lost race means the chain was replayed and gets
    /// revoked wholesale.
    pub async fn rotate_refresh(
        &self,
        client: &Client,
        old: &RefreshTokenRecord,
        scopes: &[String],
    ) -> Result<(String, RefreshTokenRecord), OAuthError> {
        let (token, record) = self.build_refresh(
            client,
            &old.subject,
            scopes,
            Some((old.chain_id, old.absolute_expires_at)),
        );
        match self
            .store
            .rotate_refresh_token(old.id, record.clone())
            .await
            .map_err(OAuthError::ServerError)?
        {
            RotationOutcome::Rotated => Ok((token, record)),
            RotationOutcome::Superseded(_) => {
                let revoked = self
                    .store
                    .revoke_chain(old.chain_id)
                    .await
                    .map_err(OAuthError::ServerError)?;
                tracing::warn!(
                    client_id = %client.client_id,
                    chain_id = %old.chain_id,
                    revoked,
                    "refresh token replay detected during rotation"
                );
                Err(OAuthError::InvalidGrant)
            }
        }
    }

    fn build_refresh(
        &self,
        client: &Client,
        subject: &str,
        scopes: &[String],
        chain: Option<(Uuid, chrono::DateTime<Utc>)>,
    ) -> (String, RefreshTokenRecord) {
        let token = generate_token();
        let now = Utc::now();
        let (chain_id, absolute_expires_at) = chain.unwrap_or_else(|| {
            (
                Uuid::new_v4(),
                now + Duration::seconds(self.config.refresh_token_absolute_ttl_secs),
            )
        });
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            token_hash: hash_token(&token),
            client_id: client.client_id.clone(),
            subject: subject.to_string(),
            scopes: scopes.to_vec(),
            issued_at: now,
            absolute_expires_at,
            chain_id,
            replaced_by: None,
            revoked: false,
        };
        (token, record)
    }

    /// Validate a Bearer token presented to a protected endpoint: signature
    /// and claims via the key manager, liveness via the record.
    pub async fn validate_bearer(&self, token: &str) -> Result<AccessTokenRecord, OAuthError> {
        self.keys
            .verify_access_token(token)
            .map_err(|_| OAuthError::InvalidToken)?;

        let record = self
            .store
            .find_access_token(&hash_token(token))
            .await
            .map_err(OAuthError::ServerError)?
            .ok_or(OAuthError::InvalidToken)?;
        if !record.is_active() {
            return Err(OAuthError::InvalidToken);
        }
        Ok(record)
    }

    /// RFC 7662 introspection over access and refresh tokens.
    pub async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, OAuthError> {
        let hash = hash_token(token);

        if let Some(record) = self
            .store
            .find_access_token(&hash)
            .await
            .map_err(OAuthError::ServerError)?
        {
            if !record.is_active() {
                return Ok(IntrospectionResponse::inactive());
            }
            return Ok(IntrospectionResponse {
                active: true,
                scope: Some(record.scopes.join(" ")),
                client_id: Some(record.client_id.clone()),
                sub: record.subject.clone(),
                exp: Some(record.expires_at.timestamp()),
                iat: Some(record.issued_at.timestamp()),
                token_type: Some("Bearer".to_string()),
            });
        }

        if let Some(record) = self
            .store
            .find_refresh_token(&hash)
            .await
            .map_err(OAuthError::ServerError)?
        {
            if !record.is_active() {
                return Ok(IntrospectionResponse::inactive());
            }
            return Ok(IntrospectionResponse {
                active: true,
                scope: Some(record.scopes.join(" ")),
                client_id: Some(record.client_id.clone()),
                sub: Some(record.subject.clone()),
                exp: Some(record.absolute_expires_at.timestamp()),
                iat: Some(record.issued_at.timestamp()),
                token_type: Some("refresh_token".to_string()),
            });
        }

        Ok(IntrospectionResponse::inactive())
    }

    /// RFC 7009 revocation. Unknown tokens and tokens of other clients
    /// succeed silently; revoking a refresh token takes its chain down.
    pub async fn revoke(&self, token: &str, client: &Client) -> Result<(), OAuthError> {
        let hash = hash_token(token);

        if let Some(record) = self
            .store
            .find_access_token(&hash)
            .await
            .map_err(OAuthError::ServerError)?
        {
            if record.client_id == client.client_id {
                self.store
                    .revoke_access_token(record.id)
                    .await
                    .map_err(OAuthError::ServerError)?;
                tracing::info!(client_id = %client.client_id, "access token revoked");
            }
            return Ok(());
        }

        if let Some(record) = self
            .store
            .find_refresh_token(&hash)
            .await
            .map_err(OAuthError::ServerError)?
        {
            if record.client_id == client.client_id {
                let revoked = self
                    .store
                    .revoke_chain(record.chain_id)
                    .await
                    .map_err(OAuthError::ServerError)?;
                tracing::info!(
                    client_id = %client.client_id,
                    chain_id = %record.chain_id,
                    revoked,
                    "refresh token chain revoked"
                );
            }
            return Ok(());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::models::GrantType;
    use crate::store::MemoryStore;

    fn shared_keys() -> Arc<KeyManager> {
        static KEYS: std::sync::OnceLock<Arc<KeyManager>> = std::sync::OnceLock::new();
        Arc::clone(KEYS.get_or_init(|| Arc::new(KeyManager::new(&test_config()).unwrap())))
    }

    fn service() -> TokenService {
        TokenService::new(
            Arc::new(MemoryStore::new()),
            shared_keys(),
            Arc::new(test_config()),
        )
    }

    fn client() -> Client {
        Client {
            client_id: "demo".to_string(),
            client_secret_hash: Some("$2b$12$hash".to_string()),
            name: "Demo".to_string(),
            redirect_uris: vec!["https://app/cb".to_string()],
            allowed_scopes: vec!["openid".to_string(), "read".to_string()],
            allowed_grants: vec![
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::ClientCredentials,
            ],
            trusted: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn minted_access_token_validates_and_introspects() {
        let service = service();
        let scopes = vec!["openid".to_string(), "read".to_string()];
        let (token, record) = service
            .mint_access(&client(), Some("u1"), &scopes, None)
            .await
            .unwrap();

        assert!(record.issued_at <= Utc::now());
        assert!(record.expires_at > record.issued_at);

        let validated = service.validate_bearer(&token).await.unwrap();
        assert_eq!(validated.id, record.id);
        assert_eq!(validated.subject.as_deref(), Some("u1"));

        let info = service.introspect(&token).await.unwrap();
        assert!(info.active);
        assert_eq!(info.scope.as_deref(), Some("openid read"));
        assert_eq!(info.client_id.as_deref(), Some("demo"));
        assert_eq!(info.sub.as_deref(), Some("u1"));
        assert_eq!(info.token_type.as_deref(), Some("Bearer"));
    }

    #[tokio::test]
    async fn revoked_token_introspects_inactive_with_no_metadata() {
        let service = service();
        let client = client();
        let (token, _) = service
            .mint_access(&client, Some("u1"), &["read".to_string()], None)
            .await
            .unwrap();

        service.revoke(&token, &client).await.unwrap();

        let info = service.introspect(&token).await.unwrap();
        assert!(!info.active);
        assert!(info.sub.is_none());
        assert!(info.scope.is_none());
        assert!(info.client_id.is_none());

        assert!(matches!(
            service.validate_bearer(&token).await,
            Err(OAuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn revoking_unknown_token_succeeds() {
        let service = service();
        assert!(service.revoke("no-such-token", &client()).await.is_ok());
    }

    #[tokio::test]
    async fn revoking_another_clients_token_is_a_silent_noop() {
        let service = service();
        let owner = client();
        let (token, _) = service
            .mint_access(&owner, Some("u1"), &["read".to_string()], None)
            .await
            .unwrap();

        let mut other = client();
        other.client_id = "other".to_string();
        service.revoke(&token, &other).await.unwrap();

        assert!(service.introspect(&token).await.unwrap().active);
    }

    #[tokio::test]
    async fn rotation_preserves_chain_and_absolute_expiry() {
        let service = service();
        let client = client();
        let scopes = vec!["openid".to_string()];
        let (_, first) = service.mint_refresh(&client, "u1", &scopes).await.unwrap();

        let (second_token, second) = service
            .rotate_refresh(&client, &first, &scopes)
            .await
            .unwrap();
        assert_eq!(second.chain_id, first.chain_id);
        assert_eq!(second.absolute_expires_at, first.absolute_expires_at);
        assert!(service.introspect(&second_token).await.unwrap().active);

        // Rotating the stale token again is a replay: whole chain dies,
        // including the rotated-in successor
        let replay = service.rotate_refresh(&client, &first, &scopes).await;
        assert!(matches!(replay, Err(OAuthError::InvalidGrant)));
        assert!(!service.introspect(&second_token).await.unwrap().active);
    }

    #[tokio::test]
    async fn garbage_bearer_token_is_invalid_token() {
        let service = service();
        assert!(matches!(
            service.validate_bearer("not-a-jwt").await,
            Err(OAuthError::InvalidToken)
        ));
    }
}
