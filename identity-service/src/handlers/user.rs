//! Authentication handlers.
//!
//! Password and second-factor checks share the same lockout semantics as the
//! invitation OTP leg: ten failures disable the account, and only an explicit
//! administrative reset re-enables it.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use validator::Validate;

use crate::models::{AuthenticateRequest, User, UserResponse};
use crate::services::totp;
use crate::utils::password::{matches, Password, PasswordHashString};
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Request to verify a second-factor passcode during login.
#[derive(Debug, Deserialize, Validate)]
pub struct SecondFactorAuthenticateRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub code: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Authenticate with email and password - implementation.
#[tracing::instrument(skip(state, req))]
pub async fn authenticate_impl(
    state: &AppState,
    req: AuthenticateRequest,
) -> Result<UserResponse, AppError> {
    req.validate()?;

    let user = state
        .db
        .find_user_by_email(&req.email)
        .await?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid credentials")))?;

    // A disabled account stays locked even for the right password.
    if user.disabled {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Account is disabled"
        )));
    }

    let password = Password::new(req.password);
    let digest = PasswordHashString::new(user.password_hash.clone());
    let valid = matches(&password, &digest).map_err(AppError::InternalError)?;
    if !valid {
        return Err(record_failure(state, &user).await?);
    }

    state.db.clear_login_counter(user.id).await?;
    tracing::info!(user_id = %user.id, "User authenticated");
    Ok(UserResponse::from(user))
}

/// Authenticate with email and password.
///
/// POST /auth/login
pub async fn authenticate(
    State(state): State<AppState>,
    Json(req): Json<AuthenticateRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let response = authenticate_impl(&state, req).await?;
    Ok(Json(response))
}

/// Verify a second-factor passcode - implementation.
#[tracing::instrument(skip(state, req))]
pub async fn second_factor_authenticate_impl(
    state: &AppState,
    req: SecondFactorAuthenticateRequest,
) -> Result<UserResponse, AppError> {
    req.validate()?;

    let user = state
        .db
        .find_user_by_email(&req.email)
        .await?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid credentials")))?;

    if user.disabled {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Account is disabled"
        )));
    }

    let valid =
        totp::verify(&user.otp_key, &req.code, Utc::now()).map_err(AppError::InternalError)?;
    if !valid {
        return Err(record_failure(state, &user).await?);
    }

    state.db.clear_login_counter(user.id).await?;
    tracing::info!(user_id = %user.id, "Second factor verified");
    Ok(UserResponse::from(user))
}

/// Verify a second-factor passcode.
///
/// POST /auth/second-factor
pub async fn second_factor_authenticate(
    State(state): State<AppState>,
    Json(req): Json<SecondFactorAuthenticateRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let response = second_factor_authenticate_impl(&state, req).await?;
    Ok(Json(response))
}

/// Administrative login-counter reset - implementation.
#[tracing::instrument(skip(state, user_external_id))]
pub async fn reset_login_counter_impl(
    state: &AppState,
    user_external_id: &str,
) -> Result<UserResponse, AppError> {
    let user = state
        .db
        .find_user_by_external_id(user_external_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

    state.db.reset_login_counter(user.id).await?;
    tracing::info!(user_id = %user.id, "Login counter reset");

    let user = state
        .db
        .find_user_by_external_id(user_external_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;
    Ok(UserResponse::from(user))
}

/// Administrative login-counter reset. Re-enables a locked-out account.
///
/// POST /users/:external_id/reset-login-counter
pub async fn reset_login_counter(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let response = reset_login_counter_impl(&state, &external_id).await?;
    Ok((StatusCode::OK, Json(response)))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a failed attempt and map the outcome to the error the caller sees.
async fn record_failure(state: &AppState, user: &User) -> Result<AppError, AppError> {
    match state.db.record_login_failure(user.id).await? {
        Some((attempts, true)) => {
            tracing::warn!(user_id = %user.id, attempts, "Account disabled after repeated failures");
            Ok(AppError::Unauthorized(anyhow::anyhow!(
                "Account disabled after too many failed attempts"
            )))
        }
        Some((attempts, false)) => {
            tracing::debug!(user_id = %user.id, attempts, "Authentication failed");
            Ok(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid credentials"
            )))
        }
        // Disabled by a concurrent caller between the read and the update.
        None => Ok(AppError::Unauthorized(anyhow::anyhow!(
            "Account is disabled"
        ))),
    }
}
