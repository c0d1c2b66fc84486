mod config;
mod dto;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod store;
mod utils;
mod workers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Method},
    middleware as axum_middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppState, Config};
use crate::handlers::{
    discovery::{jwks_handler, openid_configuration_handler},
    mfa::{
        cancel_challenge_handler, create_challenge_handler, delete_factor_handler,
        enroll_factor_handler, enroll_totp_handler, list_factors_handler,
        regenerate_backup_codes_handler, verify_challenge_handler,
    },
    oauth::{
        authorize_handler, introspect_handler, revoke_handler, token_handler, userinfo_handler,
    },
};
use crate::middleware::session_auth_middleware;
use crate::services::clients::NewClient;
use crate::services::keys::KeyManager;
use crate::services::notifier::TracingNotifier;
use crate::services::sessions::{AuthenticatedSession, MemorySessions};
use crate::services::ClientRegistry;
use crate::store::{MemoryStore, Store};
use crate::workers::spawn_sweeper;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create the application router with all routes configured
///
/// ## OAuth2 / OIDC routes (client-authenticated or public per RFC)
/// - GET  /oauth/authorize - authorization requests
/// - POST /oauth/token - token grants
/// - POST /oauth/introspect - token introspection
/// - POST /oauth/revoke - token revocation
/// - GET/POST /oauth/userinfo - OIDC UserInfo (Bearer)
///
/// ## Discovery routes (public)
/// - GET /.well-known/openid-configuration
/// - GET /.well-known/jwks.json
///
/// ## MFA routes (login session required)
/// - POST /mfa/totp/enroll, POST /mfa/enroll
/// - POST /mfa/challenge, POST /mfa/verify, DELETE /mfa/challenge/:id
/// - POST /mfa/backup-codes/regenerate
/// - GET /mfa/factors, DELETE /mfa/factors/:id
pub fn create_router(state: AppState) -> Router {
    let oauth_routes = Router::new()
        .route("/authorize", get(authorize_handler))
        .route("/token", post(token_handler))
        .route("/introspect", post(introspect_handler))
        .route("/revoke", post(revoke_handler))
        .route("/userinfo", get(userinfo_handler).post(userinfo_handler));

    let wellknown_routes = Router::new()
        .route("/openid-configuration", get(openid_configuration_handler))
        .route("/jwks.json", get(jwks_handler));

    let mfa_routes = Router::new()
        .route("/totp/enroll", post(enroll_totp_handler))
        .route("/enroll", post(enroll_factor_handler))
        .route("/challenge", post(create_challenge_handler))
        .route("/challenge/:challenge_id", delete(cancel_challenge_handler))
        .route("/verify", post(verify_challenge_handler))
        .route(
            "/backup-codes/regenerate",
            post(regenerate_backup_codes_handler),
        )
        .route("/factors", get(list_factors_handler))
        .route("/factors/:factor_id", delete(delete_factor_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            session_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/oauth", oauth_routes)
        .nest("/.well-known", wellknown_routes)
        .nest("/mfa", mfa_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                ])
                .max_age(Duration::from_secs(3600)),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oidc_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);
    let addr = config.socket_addr()?;

    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sessions = Arc::new(MemorySessions::new());
    let notifier = Arc::new(TracingNotifier);

    // Reuse persisted signing keys when the store has them; otherwise
    // generate a fresh pair and persist it so a durable store keeps
    // verifying outstanding tokens across restarts
    let stored_keys = store.list_signing_keys().await?;
    let keys = if stored_keys.is_empty() {
        let manager = KeyManager::new(&config)?;
        for key in manager.stored_keys()? {
            store.put_signing_key(key).await?;
        }
        manager
    } else {
        KeyManager::from_stored(&config, &stored_keys)?
    };

    let state = AppState::new(
        store.clone(),
        config,
        Arc::new(keys),
        sessions.clone(),
        notifier,
    );

    seed_dev_fixtures(&state, &sessions).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(
        state.store.clone(),
        state.keys.clone(),
        state.config.sweep_interval_secs,
        shutdown_rx,
    );

    let app = create_router(state);

    tracing::info!(
        "OIDC server v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the sweeper and wait for it to drain
    shutdown_tx.send(true).ok();
    sweeper.await.ok();

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Development fixtures, gated on `DEV_SEED=1`: one confidential client,
/// one user, and a logged-in session so the flows can be driven by hand.
/// The in-memory store starts empty otherwise; production deployments seed
/// clients through their own provisioning path.
async fn seed_dev_fixtures(state: &AppState, sessions: &MemorySessions) -> anyhow::Result<()> {
    if std::env::var("DEV_SEED").as_deref() != Ok("1") {
        return Ok(());
    }

    let registry = ClientRegistry::new(state.store.clone());
    let registered = registry
        .register(NewClient {
            client_id: "demo".to_string(),
            name: "Demo App".to_string(),
            redirect_uris: vec!["https://app/cb".to_string()],
            allowed_scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "read".to_string(),
            ],
            allowed_grants: vec![
                crate::models::GrantType::AuthorizationCode,
                crate::models::GrantType::ClientCredentials,
                crate::models::GrantType::RefreshToken,
            ],
            trusted: true,
            confidential: true,
        })
        .await
        .map_err(|e| anyhow::anyhow!("dev seed failed: {e}"))?;

    let user = crate::models::User {
        sub: "u1".to_string(),
        email: "u1@example.com".to_string(),
        email_verified: true,
        name: Some("Dev User".to_string()),
        picture: None,
    };
    state.store.put_user(user.clone()).await?;
    sessions
        .insert(
            "dev-session",
            AuthenticatedSession {
                user,
                auth_time: chrono::Utc::now(),
                mfa_passed: false,
            },
        )
        .await;

    // Dev convenience only: the one place a plaintext secret may be shown
    tracing::warn!(
        client_id = "demo",
        client_secret = %registered.client_secret.unwrap_or_default(),
        session_token = "dev-session",
        "dev fixtures seeded; do not enable DEV_SEED in production"
    );
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
