//! MFA management HTTP surface, gated behind the login session:
//! - POST   /mfa/totp/enroll
//! - POST   /mfa/enroll                (sms/email)
//! - POST   /mfa/challenge
//! - POST   /mfa/verify
//! - DELETE /mfa/challenge/:id
//! - POST   /mfa/backup-codes/regenerate
//! - GET    /mfa/factors
//! - DELETE /mfa/factors/:id

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::config::AppState;
use crate::dto::mfa::{
    BackupCodesResponse, ChallengeRequest, ChallengeResponse, EnrollFactorRequest, FactorInfo,
    TotpEnrollResponse, VerifyChallengeRequest, VerifyChallengeResponse,
};
use crate::error::MfaError;
use crate::middleware::SessionToken;
use crate::services::sessions::AuthenticatedSession;
use crate::services::MfaService;

fn mfa_service(state: &AppState) -> MfaService {
    MfaService::new(
        state.store.clone(),
        state.notifier.clone(),
        state.config.clone(),
    )
}

/// POST /mfa/totp/enroll
pub async fn enroll_totp_handler(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
) -> Result<Json<TotpEnrollResponse>, MfaError> {
    let enrollment = mfa_service(&state).enroll_totp(&session.user).await?;
    Ok(Json(TotpEnrollResponse {
        factor_id: enrollment.factor_id,
        secret: enrollment.secret,
        provisioning_uri: enrollment.provisioning_uri,
        backup_codes: enrollment.backup_codes,
    }))
}

/// POST /mfa/enroll - sms/email factors; the confirmation code goes out
/// immediately.
pub async fn enroll_factor_handler(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
    Json(req): Json<EnrollFactorRequest>,
) -> Result<Json<ChallengeResponse>, MfaError> {
    let challenge = mfa_service(&state)
        .enroll_destination(&session.user.sub, req.kind, &req.destination)
        .await?;
    Ok(Json(ChallengeResponse {
        challenge_id: challenge.challenge_id,
        kind: challenge.kind,
        destination_hint: challenge.destination_hint,
    }))
}

/// POST /mfa/challenge
pub async fn create_challenge_handler(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, MfaError> {
    let challenge = mfa_service(&state)
        .create_challenge(&session.user.sub, req.kind)
        .await?;
    Ok(Json(ChallengeResponse {
        challenge_id: challenge.challenge_id,
        kind: challenge.kind,
        destination_hint: challenge.destination_hint,
    }))
}

/// POST /mfa/verify
///
/// On success the login collaborator learns the session passed MFA, so
/// authorization codes minted afterwards carry the assertion.
pub async fn verify_challenge_handler(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    Json(req): Json<VerifyChallengeRequest>,
) -> Result<Json<VerifyChallengeResponse>, MfaError> {
    mfa_service(&state)
        .verify(req.challenge_id, &session.user.sub, &req.code)
        .await?;

    state.sessions.mark_mfa_passed(&token).await;
    Ok(Json(VerifyChallengeResponse { status: "ok" }))
}

/// DELETE /mfa/challenge/:id
pub async fn cancel_challenge_handler(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
    Path(challenge_id): Path<Uuid>,
) -> Result<Json<VerifyChallengeResponse>, MfaError> {
    mfa_service(&state)
        .cancel(challenge_id, &session.user.sub)
        .await?;
    Ok(Json(VerifyChallengeResponse {
        status: "cancelled",
    }))
}

/// POST /mfa/backup-codes/regenerate
pub async fn regenerate_backup_codes_handler(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
) -> Result<Json<BackupCodesResponse>, MfaError> {
    let backup_codes = mfa_service(&state)
        .regenerate_backup_codes(&session.user.sub)
        .await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}

/// GET /mfa/factors
pub async fn list_factors_handler(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
) -> Result<Json<Vec<FactorInfo>>, MfaError> {
    let factors = mfa_service(&state).list_factors(&session.user.sub).await?;
    Ok(Json(factors.iter().map(FactorInfo::from).collect()))
}

/// DELETE /mfa/factors/:id
pub async fn delete_factor_handler(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
    Path(factor_id): Path<Uuid>,
) -> Result<Json<VerifyChallengeResponse>, MfaError> {
    mfa_service(&state)
        .disable_factor(&session.user.sub, factor_id)
        .await?;
    Ok(Json(VerifyChallengeResponse { status: "deleted" }))
}
