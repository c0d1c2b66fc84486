//! Client registry: registration, lookup, and authentication.

use std::sync::Arc;

use chrono::Utc;

use crate::error::OAuthError;
use crate::models::{Client, GrantType};
use crate::store::Store;
use crate::utils::auth::ClientCredentials;
use crate::utils::secret::{generate_client_secret, hash_client_secret, verify_client_secret};

/// Parameters for registering a client. Registration happens through seed
/// data or an operator path; there is no public registration endpoint.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub client_id: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub allowed_grants: Vec<GrantType>,
    pub trusted: bool,
    /// Confidential clients get a generated secret; public clients none
    pub confidential: bool,
}

/// Registration result. The plaintext secret is returned exactly once.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub client: Client,
    pub client_secret: Option<String>,
}

#[derive(Clone)]
pub struct ClientRegistry {
    store: Arc<dyn Store>,
}

impl ClientRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn register(&self, new: NewClient) -> Result<RegisteredClient, OAuthError> {
        if new.redirect_uris.is_empty() && new.allowed_grants.contains(&GrantType::AuthorizationCode)
        {
            return Err(OAuthError::InvalidRequest(
                "authorization_code clients need at least one redirect_uri".to_string(),
            ));
        }

        let (secret, secret_hash) = if new.confidential {
            let secret = generate_client_secret();
            let hash = hash_client_secret(&secret).map_err(OAuthError::ServerError)?;
            (Some(secret), Some(hash))
        } else {
            (None, None)
        };

        let client = Client {
            client_id: new.client_id,
            client_secret_hash: secret_hash,
            name: new.name,
            redirect_uris: new.redirect_uris,
            allowed_scopes: new.allowed_scopes,
            allowed_grants: new.allowed_grants,
            trusted: new.trusted,
            created_at: Utc::now(),
        };
        self.store
            .put_client(client.clone())
            .await
            .map_err(OAuthError::ServerError)?;

        tracing::info!(client_id = %client.client_id, public = client.is_public(), "client registered");
        Ok(RegisteredClient {
            client,
            client_secret: secret,
        })
    }

    pub async fn lookup(&self, client_id: &str) -> Result<Option<Client>, OAuthError> {
        self.store
            .find_client(client_id)
            .await
            .map_err(OAuthError::ServerError)
    }

    /// Authenticate presented credentials. Unknown client and wrong secret
    /// are indistinguishable from the outside.
    pub async fn authenticate(&self, creds: &ClientCredentials) -> Result<Client, OAuthError> {
        let client = self
            .lookup(&creds.client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;

        match (&client.client_secret_hash, &creds.client_secret) {
            (Some(hash), Some(secret)) => {
                let ok = verify_client_secret(secret, hash).map_err(OAuthError::ServerError)?;
                if !ok {
                    return Err(OAuthError::InvalidClient);
                }
            }
            // Confidential client without a secret, or a secret presented
            // for a public client: both fail closed
            (Some(_), None) | (None, Some(_)) => return Err(OAuthError::InvalidClient),
            (None, None) => {}
        }
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn demo_client(confidential: bool) -> NewClient {
        NewClient {
            client_id: "demo".to_string(),
            name: "Demo App".to_string(),
            redirect_uris: vec!["https://app/cb".to_string()],
            allowed_scopes: vec!["openid".to_string(), "profile".to_string()],
            allowed_grants: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            trusted: false,
            confidential,
        }
    }

    #[tokio::test]
    async fn confidential_client_authenticates_with_its_secret() {
        let registry = registry();
        let registered = registry.register(demo_client(true)).await.unwrap();
        let secret = registered.client_secret.unwrap();

        let ok = registry
            .authenticate(&ClientCredentials {
                client_id: "demo".to_string(),
                client_secret: Some(secret),
            })
            .await;
        assert!(ok.is_ok());

        let bad = registry
            .authenticate(&ClientCredentials {
                client_id: "demo".to_string(),
                client_secret: Some("wrong".to_string()),
            })
            .await;
        assert!(matches!(bad, Err(OAuthError::InvalidClient)));
    }

    #[tokio::test]
    async fn unknown_client_and_bad_secret_are_the_same_error() {
        let registry = registry();
        registry.register(demo_client(true)).await.unwrap();

        let unknown = registry
            .authenticate(&ClientCredentials {
                client_id: "nope".to_string(),
                client_secret: Some("x".to_string()),
            })
            .await
            .unwrap_err();
        let bad_secret = registry
            .authenticate(&ClientCredentials {
                client_id: "demo".to_string(),
                client_secret: Some("x".to_string()),
            })
            .await
            .unwrap_err();
        assert_eq!(unknown.code(), bad_secret.code());
    }

    #[tokio::test]
    async fn public_client_must_not_present_a_secret() {
        let registry = registry();
        registry.register(demo_client(false)).await.unwrap();

        assert!(registry
            .authenticate(&ClientCredentials {
                client_id: "demo".to_string(),
                client_secret: None,
            })
            .await
            .is_ok());

        assert!(matches!(
            registry
                .authenticate(&ClientCredentials {
                    client_id: "demo".to_string(),
                    client_secret: Some("anything".to_string()),
                })
                .await,
            Err(OAuthError::InvalidClient)
        ));
    }

    #[tokio::test]
    async fn missing_secret_for_confidential_client_fails() {
        let registry = registry();
        registry.register(demo_client(true)).await.unwrap();
        assert!(matches!(
            registry
                .authenticate(&ClientCredentials {
                    client_id: "demo".to_string(),
                    client_secret: None,
                })
                .await,
            Err(OAuthError::InvalidClient)
        ));
    }

    #[tokio::test]
    async fn code_clients_need_a_redirect_uri() {
        let registry = registry();
        let mut new = demo_client(true);
        new.redirect_uris.clear();
        assert!(matches!(
            registry.register(new).await,
            Err(OAuthError::InvalidRequest(_))
        ));
    }
}
