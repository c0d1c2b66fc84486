//! Core OAuth2/OIDC protocol logic: authorization request validation,
//! code minting, and the per-grant token state machines.
//!
//! The token endpoint dispatches on the [`TokenGrant`] union after client
//! authentication. Replay is treated as hostile everywhere: a second
//! redemption of a code revokes everything that code produced, and reuse of
//! a rotated refresh token revokes its whole chain.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::dto::oauth::{AuthorizationRequest, TokenGrant};
use crate::error::OAuthError;
use crate::models::{AuthorizationCode, Client, GrantType};
use crate::services::keys::KeyManager;
use crate::services::sessions::AuthenticatedSession;
use crate::services::token::TokenService;
use crate::services::ClientRegistry;
use crate::store::{CodeConsumption, Store};
use crate::utils::auth::ClientCredentials;
use crate::utils::pkce::{
    is_supported_method, validate_code_challenge, validate_code_verifier, verify_pkce,
};
use crate::utils::secret::{generate_token, hash_token};

/// Successful token response per RFC 6749 §5.1.
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    fn new(
        access_token: String,
        expires_in: i64,
        scopes: &[String],
        refresh_token: Option<String>,
        id_token: Option<String>,
    ) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope: scopes.join(" "),
            refresh_token,
            id_token,
        }
    }
}

/// How an authorization-endpoint failure must reach the user agent.
///
/// Failures before the redirect URI is known to be trustworthy render an
/// error page; everything after goes back to the client via redirect with
/// the verbatim `state`.
#[derive(Debug)]
pub enum AuthorizeReject {
    Page(OAuthError),
    Redirect(OAuthError),
}

#[derive(Clone)]
pub struct OAuthService {
    store: Arc<dyn Store>,
    keys: Arc<KeyManager>,
    config: Arc<Config>,
    clients: ClientRegistry,
    tokens: TokenService,
}

impl OAuthService {
    pub fn new(store: Arc<dyn Store>, keys: Arc<KeyManager>, config: Arc<Config>) -> Self {
        Self {
            clients: ClientRegistry::new(Arc::clone(&store)),
            tokens: TokenService::new(Arc::clone(&store), Arc::clone(&keys), Arc::clone(&config)),
            store,
            keys,
            config,
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    // ========================================================================
    // Authorization endpoint
    // ========================================================================

    /// Validate an authorization request in fail-fast order. The first two
    /// checks gate whether the redirect URI may be trusted for error
    /// delivery at all.
    pub async fn validate_authorization_request(
        &self,
        req: &AuthorizationRequest,
    ) -> Result<Client, AuthorizeReject> {
        let client = self
            .clients
            .lookup(&req.client_id)
            .await
            .map_err(AuthorizeReject::Page)?
            .ok_or(AuthorizeReject::Page(OAuthError::InvalidClient))?;

        if !client.has_redirect_uri(&req.redirect_uri) {
            return Err(AuthorizeReject::Page(OAuthError::InvalidRequest(
                "redirect_uri is not registered for this client".to_string(),
            )));
        }

        if req.response_type != "code" {
            return Err(AuthorizeReject::Redirect(OAuthError::UnsupportedResponseType));
        }

        let scopes = req.scopes();
        if !client.allows_scopes(&scopes) {
            return Err(AuthorizeReject::Redirect(OAuthError::InvalidScope));
        }

        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(AuthorizeReject::Redirect(OAuthError::UnauthorizedClient));
        }

        match (&req.code_challenge, &req.code_challenge_method) {
            (Some(challenge), Some(method)) => {
                if !is_supported_method(method) {
                    return Err(AuthorizeReject::Redirect(OAuthError::InvalidRequest(
                        "code_challenge_method must be S256 or plain".to_string(),
                    )));
                }
                if !validate_code_challenge(challenge, method) {
                    return Err(AuthorizeReject::Redirect(OAuthError::InvalidRequest(
                        "malformed code_challenge".to_string(),
                    )));
                }
            }
            (Some(_), None) => {
                return Err(AuthorizeReject::Redirect(OAuthError::InvalidRequest(
                    "code_challenge_method is required with code_challenge".to_string(),
                )));
            }
            (None, Some(_)) => {
                return Err(AuthorizeReject::Redirect(OAuthError::InvalidRequest(
                    "code_challenge_method without code_challenge".to_string(),
                )));
            }
            (None, None) => {
                if client.is_public() && self.config.require_pkce_for_public_clients {
                    return Err(AuthorizeReject::Redirect(OAuthError::InvalidRequest(
                        "code_challenge is required for public clients".to_string(),
                    )));
                }
            }
        }

        Ok(client)
    }

    /// Mint a single-use authorization code bound to the validated request
    /// and the authenticated session. Returns the plaintext code for the
    /// redirect; only its hash is stored.
    pub async fn create_authorization_code(
        &self,
        client: &Client,
        session: &AuthenticatedSession,
        req: &AuthorizationRequest,
    ) -> Result<String, OAuthError> {
        let code = generate_token();
        let now = Utc::now();

        let record = AuthorizationCode {
            id: Uuid::new_v4(),
            code_hash: hash_token(&code),
            client_id: client.client_id.clone(),
            subject: session.user.sub.clone(),
            redirect_uri: req.redirect_uri.clone(),
            scopes: req.scopes(),
            code_challenge: req.code_challenge.clone(),
            code_challenge_method: req.code_challenge_method.clone(),
            nonce: req.nonce.clone(),
            auth_time: session.auth_time,
            mfa_passed: session.mfa_passed,
            expires_at: now + Duration::seconds(self.config.code_ttl_secs),
            used: false,
            issued_access_ids: Vec::new(),
            issued_chain_id: None,
            created_at: now,
        };
        self.store
            .put_code(record)
            .await
            .map_err(OAuthError::ServerError)?;

        tracing::info!(
            client_id = %client.client_id,
            sub = %session.user.sub,
            "authorization code issued"
        );
        Ok(code)
    }

    // ========================================================================
    // Token endpoint
    // ========================================================================

    /// Authenticate the client, then run the grant-specific state machine.
    pub async fn token(
        &self,
        creds: ClientCredentials,
        grant: TokenGrant,
    ) -> Result<TokenResponse, OAuthError> {
        let grant_type = match &grant {
            TokenGrant::AuthorizationCode { .. } => GrantType::AuthorizationCode,
            TokenGrant::ClientCredentials { .. } => GrantType::ClientCredentials,
            TokenGrant::RefreshToken { .. } => GrantType::RefreshToken,
        };

        let client = self.clients.authenticate(&creds).await?;

        // Public clients are only acceptable on the PKCE-bound code exchange
        if client.is_public() && grant_type != GrantType::AuthorizationCode {
            return Err(OAuthError::InvalidClient);
        }
        if !client.allows_grant(grant_type) {
            return Err(OAuthError::UnauthorizedClient);
        }

        match grant {
            TokenGrant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                self.exchange_authorization_code(&client, &code, &redirect_uri, code_verifier)
                    .await
            }
            TokenGrant::ClientCredentials { scopes } => {
                self.client_credentials(&client, scopes).await
            }
            TokenGrant::RefreshToken {
                refresh_token,
                scopes,
            } => self.refresh(&client, &refresh_token, scopes).await,
        }
    }

    async fn exchange_authorization_code(
        &self,
        client: &Client,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<String>,
    ) -> Result<TokenResponse, OAuthError> {
        // Consume first: even a failed exchange burns the code
        let record = match self
            .store
            .consume_code(&hash_token(code))
            .await
            .map_err(OAuthError::ServerError)?
        {
            CodeConsumption::NotFound => return Err(OAuthError::InvalidGrant),
            CodeConsumption::Replayed(record) => {
                self.compensate_code_replay(&record).await?;
                return Err(OAuthError::InvalidGrant);
            }
            CodeConsumption::Consumed(record) => record,
        };

        if record.is_expired() {
            return Err(OAuthError::InvalidGrant);
        }
        if record.client_id != client.client_id {
            return Err(OAuthError::InvalidGrant);
        }
        if record.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant);
        }

        match (&record.code_challenge, &record.code_challenge_method) {
            (Some(challenge), Some(method)) => {
                let verifier = code_verifier.ok_or_else(|| {
                    OAuthError::InvalidRequest("code_verifier is required".to_string())
                })?;
                if !validate_code_verifier(&verifier)
                    || !verify_pkce(&verifier, challenge, method)
                {
                    return Err(OAuthError::InvalidGrant);
                }
            }
            // A challenge is never stored without its method
            (Some(_), None) => return Err(OAuthError::InvalidGrant),
            (None, _) => {
                if client.is_public() {
                    return Err(OAuthError::InvalidGrant);
                }
            }
        }

        // MFA gate: a protected subject must have completed a challenge
        // before this code was minted
        if !record.mfa_passed && self.subject_is_mfa_protected(&record.subject).await? {
            return Err(OAuthError::MfaRequired);
        }

        let scopes = record.scopes.clone();
        let refresh = if client.allows_grant(GrantType::RefreshToken) {
            Some(
                self.tokens
                    .mint_refresh(client, &record.subject, &scopes)
                    .await?,
            )
        } else {
            None
        };
        let refresh_id = refresh.as_ref().map(|(_, r)| r.id);
        let chain_id = refresh.as_ref().map(|(_, r)| r.chain_id);

        let (access_token, access_record) = self
            .tokens
            .mint_access(client, Some(&record.subject), &scopes, refresh_id)
            .await?;

        self.store
            .record_code_issuance(record.id, access_record.id, chain_id)
            .await
            .map_err(OAuthError::ServerError)?;

        let id_token = if scopes.iter().any(|s| s == "openid") {
            let user = self
                .store
                .find_user(&record.subject)
                .await
                .map_err(OAuthError::ServerError)?
                .ok_or(OAuthError::InvalidGrant)?;
            Some(
                self.keys
                    .sign_id_token(
                        &user,
                        &client.client_id,
                        &scopes,
                        record.nonce.as_deref(),
                        record.auth_time,
                    )
                    .map_err(OAuthError::ServerError)?,
            )
        } else {
            None
        };

        tracing::info!(client_id = %client.client_id, sub = %record.subject, "code exchanged for tokens");
        Ok(TokenResponse::new(
            access_token,
            self.config.access_token_ttl_secs,
            &scopes,
            refresh.map(|(token, _)| token),
            id_token,
        ))
    }

    /// A consumed code was presented again: revoke everything the first
    /// redemption produced before reporting failure.
    async fn compensate_code_replay(&self, record: &AuthorizationCode) -> Result<(), OAuthError> {
        for access_id in &record.issued_access_ids {
            self.store
                .revoke_access_token(*access_id)
                .await
                .map_err(OAuthError::ServerError)?;
        }
        if let Some(chain_id) = record.issued_chain_id {
            self.store
                .revoke_chain(chain_id)
                .await
                .map_err(OAuthError::ServerError)?;
        }
        tracing::warn!(
            client_id = %record.client_id,
            sub = %record.subject,
            "authorization code replay; derived tokens revoked"
        );
        Ok(())
    }

    async fn client_credentials(
        &self,
        client: &Client,
        scopes: Option<Vec<String>>,
    ) -> Result<TokenResponse, OAuthError> {
        let scopes = scopes.unwrap_or_else(|| client.allowed_scopes.clone());
        if !client.allows_scopes(&scopes) {
            return Err(OAuthError::InvalidScope);
        }

        // No subject, no refresh token, no ID Token
        let (access_token, _) = self.tokens.mint_access(client, None, &scopes, None).await?;

        tracing::info!(client_id = %client.client_id, "client credentials token issued");
        Ok(TokenResponse::new(
            access_token,
            self.config.access_token_ttl_secs,
            &scopes,
            None,
            None,
        ))
    }

    async fn refresh(
        &self,
        client: &Client,
        refresh_token: &str,
        requested_scopes: Option<Vec<String>>,
    ) -> Result<TokenResponse, OAuthError> {
        let record = self
            .store
            .find_refresh_token(&hash_token(refresh_token))
            .await
            .map_err(OAuthError::ServerError)?
            .ok_or(OAuthError::InvalidGrant)?;

        if record.client_id != client.client_id {
            return Err(OAuthError::InvalidGrant);
        }

        // A replaced or revoked token coming back is a replay: kill the chain
        if record.revoked || record.replaced_by.is_some() {
            let revoked = self
                .store
                .revoke_chain(record.chain_id)
                .await
                .map_err(OAuthError::ServerError)?;
            tracing::warn!(
                client_id = %client.client_id,
                chain_id = %record.chain_id,
                revoked,
                "refresh token replay; chain revoked"
            );
            return Err(OAuthError::InvalidGrant);
        }

        if record.is_expired() {
            return Err(OAuthError::InvalidGrant);
        }

        // Scope narrowing only; widening is refused
        let scopes = match requested_scopes {
            Some(requested) => {
                let within = requested
                    .iter()
                    .all(|s| record.scopes.iter().any(|held| held == s));
                if !within {
                    return Err(OAuthError::InvalidScope);
                }
                requested
            }
            None => record.scopes.clone(),
        };

        let (new_refresh_token, new_record) =
            self.tokens.rotate_refresh(client, &record, &scopes).await?;
        let (access_token, _) = self
            .tokens
            .mint_access(client, Some(&record.subject), &scopes, Some(new_record.id))
            .await?;

        tracing::info!(client_id = %client.client_id, sub = %record.subject, "refresh token rotated");
        Ok(TokenResponse::new(
            access_token,
            self.config.access_token_ttl_secs,
            &scopes,
            Some(new_refresh_token),
            None,
        ))
    }

    async fn subject_is_mfa_protected(&self, subject: &str) -> Result<bool, OAuthError> {
        let factors = self
            .store
            .list_factors(subject)
            .await
            .map_err(OAuthError::ServerError)?;
        Ok(factors.iter().any(|f| f.is_usable()))
    }
}
