use std::sync::Arc;

use crate::services::keys::KeyManager;
use crate::services::notifier::Notifier;
use crate::services::sessions::LoginSessions;
use crate::store::Store;

/// JWT signing algorithm for ID and access tokens.
///
/// HS256 is deliberately absent: ID Tokens are always signed with an
/// asymmetric key so relying parties can verify against the JWKS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlg {
    Rs256,
    Es256,
}

impl SigningAlg {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlg::Rs256 => "RS256",
            SigningAlg::Es256 => "ES256",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "RS256" => Ok(SigningAlg::Rs256),
            "ES256" => Ok(SigningAlg::Es256),
            other => anyhow::bail!("unsupported signing algorithm: {other}"),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Issuer URL, used verbatim as the `iss` claim and discovery base
    pub issuer_url: String,

    // Token lifetimes (seconds)
    pub access_token_ttl_secs: i64,
    pub refresh_token_absolute_ttl_secs: i64,
    pub code_ttl_secs: i64,
    pub mfa_code_ttl_secs: i64,
    pub mfa_max_attempts: u32,

    // Signing keys
    pub signing_alg: SigningAlg,
    pub rsa_key_bits: usize,
    pub key_rotation_period_secs: i64,
    pub key_overlap_window_secs: i64,

    /// Must stay true; public clients without PKCE are never acceptable
    pub require_pkce_for_public_clients: bool,

    // Server
    pub server_host: String,
    pub server_port: u16,

    // Background workers
    pub sweep_interval_secs: u64,
}

/// Hard ceiling on authorization code lifetime (10 minutes)
const MAX_CODE_TTL_SECS: i64 = 600;

/// Hard ceiling on MFA challenge lifetime (5 minutes)
const MAX_MFA_CODE_TTL_SECS: i64 = 300;

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            issuer_url: env_or("ISSUER_URL", "https://auth.example"),
            access_token_ttl_secs: env_or("ACCESS_TOKEN_TTL_SECS", "3600").parse()?,
            refresh_token_absolute_ttl_secs: env_or("REFRESH_TOKEN_ABSOLUTE_TTL_SECS", "2592000")
                .parse()?, // 30 days
            code_ttl_secs: env_or("CODE_TTL_SECS", "600").parse()?,
            mfa_code_ttl_secs: env_or("MFA_CODE_TTL_SECS", "300").parse()?,
            mfa_max_attempts: env_or("MFA_MAX_ATTEMPTS", "3").parse()?,
            signing_alg: SigningAlg::parse(&env_or("SIGNING_ALG", "RS256"))?,
            rsa_key_bits: env_or("RSA_KEY_BITS", "2048").parse()?,
            key_rotation_period_secs: env_or("KEY_ROTATION_PERIOD_SECS", "7776000").parse()?, // 90 days
            key_overlap_window_secs: env_or("KEY_OVERLAP_WINDOW_SECS", "86400").parse()?, // 1 day
            require_pkce_for_public_clients: env_or("REQUIRE_PKCE_FOR_PUBLIC_CLIENTS", "true")
                .parse()?,
            server_host: env_or("SERVER_HOST", "0.0.0.0"),
            server_port: env_or("SERVER_PORT", "3000").parse()?,
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", "60").parse()?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.code_ttl_secs <= 0 || self.code_ttl_secs > MAX_CODE_TTL_SECS {
            anyhow::bail!(
                "CODE_TTL_SECS must be in 1..={MAX_CODE_TTL_SECS}, got {}",
                self.code_ttl_secs
            );
        }
        if self.mfa_code_ttl_secs <= 0 || self.mfa_code_ttl_secs > MAX_MFA_CODE_TTL_SECS {
            anyhow::bail!(
                "MFA_CODE_TTL_SECS must be in 1..={MAX_MFA_CODE_TTL_SECS}, got {}",
                self.mfa_code_ttl_secs
            );
        }
        if !self.require_pkce_for_public_clients {
            anyhow::bail!("REQUIRE_PKCE_FOR_PUBLIC_CLIENTS cannot be disabled");
        }
        if self.issuer_url.ends_with('/') {
            anyhow::bail!("ISSUER_URL must not have a trailing slash");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.server_host, self.server_port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid socket address: {e}"))
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Shared application state handed to every handler.
///
/// All collaborators sit behind trait objects so a deployment can swap the
/// memory store, the session source, or the notifier without touching the
/// protocol core.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub keys: Arc<KeyManager>,
    pub sessions: Arc<dyn LoginSessions>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        config: Arc<Config>,
        keys: Arc<KeyManager>,
        sessions: Arc<dyn LoginSessions>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            config,
            keys,
            sessions,
            notifier,
        }
    }
}

/// Fixed configuration for unit tests across the crate. 2048-bit keys: the
/// smallest size the JWT signer accepts.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        issuer_url: "https://auth.example".to_string(),
        access_token_ttl_secs: 3600,
        refresh_token_absolute_ttl_secs: 2_592_000,
        code_ttl_secs: 600,
        mfa_code_ttl_secs: 300,
        mfa_max_attempts: 3,
        signing_alg: SigningAlg::Rs256,
        rsa_key_bits: 2048,
        key_rotation_period_secs: 7_776_000,
        key_overlap_window_secs: 86_400,
        require_pkce_for_public_clients: true,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        sweep_interval_secs: 60,
    }
}
