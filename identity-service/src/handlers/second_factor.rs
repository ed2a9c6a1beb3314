//! Second-factor provisioning handlers.
//!
//! Enrolling a new authenticator never touches the active secret: a
//! provisional secret is stored first, and only a successful verification
//! against it promotes it to active.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Serialize;
use validator::Validate;

use crate::models::{SecondFactorActivateRequest, User, UserResponse};
use crate::services::totp;
use crate::utils::secrets::generate_otp_secret;
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Response after provisioning a second factor. Carries the provisional
/// secret once, for authenticator enrollment; it is never readable again.
#[derive(Debug, Serialize)]
pub struct ProvisionSecondFactorResponse {
    pub otp_secret: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Provision a new provisional OTP secret - implementation.
#[tracing::instrument(skip(state, user_external_id))]
pub async fn provision_second_factor_impl(
    state: &AppState,
    user_external_id: &str,
) -> Result<ProvisionSecondFactorResponse, AppError> {
    let user = find_user(state, user_external_id).await?;
    if user.disabled {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Account is disabled"
        )));
    }

    let secret = generate_otp_secret();
    state.db.set_provisional_otp_key(user.id, &secret).await?;

    tracing::info!(user_id = %user.id, "Provisional second factor stored");
    Ok(ProvisionSecondFactorResponse { otp_secret: secret })
}

/// Provision a new provisional OTP secret.
///
/// POST /users/:external_id/second-factor
pub async fn provision_second_factor(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<(StatusCode, Json<ProvisionSecondFactorResponse>), AppError> {
    let response = provision_second_factor_impl(&state, &external_id).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Activate a provisioned second factor - implementation.
///
/// The submitted passcode is verified against the provisional secret, never
/// the active one. Promotion is a single conditional UPDATE, so a stale
/// activation after the provisional fields were cleared changes nothing.
#[tracing::instrument(skip(state, user_external_id, req), fields(method = ?req.method))]
pub async fn activate_second_factor_impl(
    state: &AppState,
    user_external_id: &str,
    req: SecondFactorActivateRequest,
) -> Result<UserResponse, AppError> {
    req.validate()?;
    let user = find_user(state, user_external_id).await?;

    let provisional = user.provisional_otp_key.as_deref().ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("No provisional second factor to activate"))
    })?;

    let valid = totp::verify(provisional, &req.code, Utc::now()).map_err(AppError::InternalError)?;
    if !valid {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid passcode")));
    }

    let promoted = state
        .db
        .promote_provisional_otp_key(user.id, req.method.as_str())
        .await?;
    if !promoted {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "No provisional second factor to activate"
        )));
    }

    tracing::info!(user_id = %user.id, "Second factor activated");
    let user = find_user(state, user_external_id).await?;
    Ok(UserResponse::from(user))
}

/// Activate a provisioned second factor.
///
/// POST /users/:external_id/second-factor/activate
pub async fn activate_second_factor(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Json(req): Json<SecondFactorActivateRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let response = activate_second_factor_impl(&state, &external_id, req).await?;
    Ok(Json(response))
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn find_user(state: &AppState, external_id: &str) -> Result<User, AppError> {
    state
        .db
        .find_user_by_external_id(external_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))
}
