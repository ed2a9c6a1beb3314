//! Invitation lifecycle handlers.
//!
//! Implements the invitation flow:
//! - Create invitation (self-registration, new user, existing user joining)
//! - Get invitation details by code
//! - OTP leg: store contact details, send, reprovision, validate
//! - Patch contact details while the invite is live
//! - Complete invitation (creates the user and role binding atomically)

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    CompleteInviteResponse, CreateInviteRequest, GenerateOtpRequest, Invite, InviteKind,
    InvitePatch, InviteResponse, PatchField, Service, User, ValidateOtpRequest,
};
use crate::services::totp;
use crate::utils::password::{hash_password, Password};
use crate::utils::secrets::{generate_external_id, generate_invite_code, generate_otp_secret};
use crate::utils::validation::{is_valid_telephone_number, validate_invite_patches, MIN_PASSWORD_LENGTH};
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Request to complete an invitation.
#[derive(Debug, Deserialize)]
pub struct CompleteInviteRequest {
    /// Password for the new account, unless one was set during the OTP leg.
    pub password: Option<String>,
    /// Name of the service to create; self-registration only.
    pub service_name: Option<String>,
}

/// Response after dispatching a passcode SMS.
#[derive(Debug, Serialize)]
pub struct SendOtpResponse {
    pub status: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new invitation - implementation.
#[tracing::instrument(skip(state, req), fields(kind = ?req.kind, role_name = %req.role_name))]
pub async fn create_invite_impl(
    state: &AppState,
    req: CreateInviteRequest,
) -> Result<InviteResponse, AppError> {
    req.validate()?;

    // Resolve the target service; required for every kind but
    // self-registration, which creates its own at completion.
    let service = match req.kind {
        InviteKind::SelfRegistration => None,
        InviteKind::NewUser | InviteKind::ExistingUser => {
            let external_id = req.service_external_id.as_deref().ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("service_external_id is required"))
            })?;
            Some(
                state
                    .db
                    .find_service_by_external_id(external_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))?,
            )
        }
    };

    state
        .db
        .find_role_by_name(&req.role_name)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Role not found")))?;

    let sender_id = match req.sender_external_id.as_deref() {
        Some(external_id) => Some(
            state
                .db
                .find_user_by_external_id(external_id)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Sender not found")))?
                .id,
        ),
        None => None,
    };

    // One live invite per email (per service, for the joining kinds).
    let service_id = service.as_ref().map(|s| s.id);
    if state
        .db
        .find_active_invite_by_email(&req.email, service_id)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "An active invite already exists for this email"
        )));
    }

    let existing_user = state.db.find_user_by_email(&req.email).await?;
    match req.kind {
        InviteKind::SelfRegistration | InviteKind::NewUser => {
            if existing_user.is_some() {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "User with this email already exists"
                )));
            }
        }
        InviteKind::ExistingUser => {
            let user = existing_user
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;
            let service = service.as_ref().ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("service_external_id is required"))
            })?;
            if state.db.find_service_role(service.id, user.id).await?.is_some() {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "User already has a role in this service"
                )));
            }
        }
    }

    let invite = Invite::new(
        req.kind,
        req.email,
        req.role_name,
        service_id,
        sender_id,
        generate_invite_code(),
        generate_otp_secret(),
    );
    state.db.insert_invite(&invite).await?;

    tracing::info!(invite_id = %invite.id, "Invite created");
    project_invite(&invite, Utc::now())
}

/// Create a new invitation.
///
/// POST /invites
pub async fn create_invite(
    State(state): State<AppState>,
    Json(req): Json<CreateInviteRequest>,
) -> Result<(StatusCode, Json<InviteResponse>), AppError> {
    let response = create_invite_impl(&state, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Get invitation details by code - implementation.
#[tracing::instrument(skip(state, code))]
pub async fn get_invite_impl(state: &AppState, code: &str) -> Result<InviteResponse, AppError> {
    let invite = find_invite(state, code).await?;
    let now = Utc::now();
    if invite.state_at(now).is_terminal() {
        return Err(AppError::Gone(anyhow::anyhow!("Invite is no longer valid")));
    }
    project_invite(&invite, now)
}

/// Get invitation details by code.
///
/// GET /invites/:code
pub async fn get_invite(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<InviteResponse>, AppError> {
    let response = get_invite_impl(&state, &code).await?;
    Ok(Json(response))
}

/// Store the contact details for the OTP leg - implementation.
///
/// Deliberately permitted on expired invites; only a disabled invite is
/// refused. Expiry is enforced again at validation and completion.
#[tracing::instrument(skip(state, code, req))]
pub async fn generate_otp_impl(
    state: &AppState,
    code: &str,
    req: GenerateOtpRequest,
) -> Result<InviteResponse, AppError> {
    req.validate()?;
    let invite = find_invite(state, code).await?;
    ensure_not_disabled(&invite)?;

    if !is_valid_telephone_number(&req.telephone_number) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "telephone_number must be in E.164 format"
        )));
    }

    let password_hash = match req.password {
        Some(password) => {
            if password.len() < MIN_PASSWORD_LENGTH {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "password must be at least {} characters",
                    MIN_PASSWORD_LENGTH
                )));
            }
            Some(
                hash_password(&Password::new(password))
                    .map_err(AppError::InternalError)?
                    .into_string(),
            )
        }
        None => None,
    };

    let updated = state
        .db
        .update_invite_contact(
            invite.id,
            Some(&req.telephone_number),
            password_hash.as_deref(),
        )
        .await?;
    if !updated {
        return Err(AppError::Gone(anyhow::anyhow!("Invite is no longer valid")));
    }

    let invite = find_invite(state, code).await?;
    project_invite(&invite, Utc::now())
}

/// Store the contact details for the OTP leg.
///
/// POST /invites/:code/otp
pub async fn generate_otp(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<GenerateOtpRequest>,
) -> Result<Json<InviteResponse>, AppError> {
    let response = generate_otp_impl(&state, &code, req).await?;
    Ok(Json(response))
}

/// Send the current passcode over SMS - implementation.
///
/// Delivery happens outside any transaction and is best-effort; like
/// `generate_otp`, this is permitted on expired invites.
#[tracing::instrument(skip(state, code))]
pub async fn send_otp_impl(state: &AppState, code: &str) -> Result<SendOtpResponse, AppError> {
    let invite = find_invite(state, code).await?;
    ensure_not_disabled(&invite)?;

    let telephone_number = invite.telephone_number.clone().ok_or_else(|| {
        AppError::PreconditionFailed(anyhow::anyhow!("Invite has no telephone number"))
    })?;

    let otp = totp::generate(&invite.otp_key, Utc::now()).map_err(AppError::InternalError)?;
    state.notifier.send_otp_sms_detached(telephone_number, otp);

    tracing::info!(invite_id = %invite.id, "OTP SMS dispatched");
    Ok(SendOtpResponse { status: "sent" })
}

/// Send the current passcode over SMS.
///
/// POST /invites/:code/otp/send
pub async fn send_otp(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<(StatusCode, Json<SendOtpResponse>), AppError> {
    let response = send_otp_impl(&state, &code).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Replace the invite's OTP secret - implementation.
///
/// A single UPDATE swaps the secret, so passcodes derived from the old one
/// stop verifying immediately. Lifecycle state is unchanged.
#[tracing::instrument(skip(state, code))]
pub async fn reprovision_otp_impl(
    state: &AppState,
    code: &str,
) -> Result<InviteResponse, AppError> {
    let invite = find_invite(state, code).await?;
    ensure_not_disabled(&invite)?;

    let rotated = state
        .db
        .rotate_invite_otp_key(invite.id, &generate_otp_secret())
        .await?;
    if !rotated {
        return Err(AppError::Gone(anyhow::anyhow!("Invite is no longer valid")));
    }

    tracing::info!(invite_id = %invite.id, "Invite OTP secret reprovisioned");
    let invite = find_invite(state, code).await?;
    project_invite(&invite, Utc::now())
}

/// Replace the invite's OTP secret.
///
/// POST /invites/:code/otp/reprovision
pub async fn reprovision_otp(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<InviteResponse>, AppError> {
    let response = reprovision_otp_impl(&state, &code).await?;
    Ok(Json(response))
}

/// Validate a submitted passcode - implementation.
#[tracing::instrument(skip(state, code, req))]
pub async fn validate_otp_impl(
    state: &AppState,
    code: &str,
    req: ValidateOtpRequest,
) -> Result<InviteResponse, AppError> {
    req.validate()?;
    let invite = find_invite(state, code).await?;
    ensure_not_disabled(&invite)?;

    let now = Utc::now();
    if invite.is_expired_at(now) {
        return Err(AppError::Gone(anyhow::anyhow!("Invite has expired")));
    }
    if invite.verified_at.is_some() {
        return Err(AppError::Gone(anyhow::anyhow!(
            "Invite has already been validated"
        )));
    }

    let valid = totp::verify(&invite.otp_key, &req.otp, now).map_err(AppError::InternalError)?;
    if !valid {
        return match state.db.record_invite_otp_failure(invite.id).await? {
            Some((attempts, true)) => {
                tracing::warn!(invite_id = %invite.id, attempts, "Invite disabled after repeated OTP failures");
                Err(AppError::Gone(anyhow::anyhow!(
                    "Invite disabled after too many failed attempts"
                )))
            }
            Some((attempts, false)) => {
                tracing::debug!(invite_id = %invite.id, attempts, "OTP validation failed");
                Err(AppError::Unauthorized(anyhow::anyhow!("Invalid passcode")))
            }
            // Disabled by a concurrent caller between the read and the update.
            None => Err(AppError::Gone(anyhow::anyhow!("Invite is no longer valid"))),
        };
    }

    let marked = state.db.mark_invite_validated(invite.id).await?;
    if !marked {
        return Err(AppError::Gone(anyhow::anyhow!("Invite is no longer valid")));
    }

    tracing::info!(invite_id = %invite.id, "Invite validated");
    let invite = find_invite(state, code).await?;
    project_invite(&invite, Utc::now())
}

/// Validate a submitted passcode.
///
/// POST /invites/:code/otp/validate
pub async fn validate_otp(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<ValidateOtpRequest>,
) -> Result<Json<InviteResponse>, AppError> {
    let response = validate_otp_impl(&state, &code, req).await?;
    Ok(Json(response))
}

/// Patch an invite's contact details - implementation.
#[tracing::instrument(skip(state, code, patches))]
pub async fn update_invite_impl(
    state: &AppState,
    code: &str,
    patches: Vec<InvitePatch>,
) -> Result<InviteResponse, AppError> {
    let invite = find_invite(state, code).await?;
    if invite.state_at(Utc::now()).is_terminal() {
        return Err(AppError::Gone(anyhow::anyhow!("Invite is no longer valid")));
    }

    let errors = validate_invite_patches(&patches);
    if !errors.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(errors.join("; "))));
    }

    // Fold the operations into one conditional UPDATE; a multi-field patch
    // lands entirely or not at all.
    let mut telephone_number = None;
    let mut password_hash = None;
    for patch in &patches {
        match patch.path {
            PatchField::TelephoneNumber => telephone_number = Some(patch.value.as_str()),
            PatchField::Password => {
                password_hash = Some(
                    hash_password(&Password::new(patch.value.clone()))
                        .map_err(AppError::InternalError)?
                        .into_string(),
                );
            }
        }
    }

    let updated = state
        .db
        .update_invite_contact(invite.id, telephone_number, password_hash.as_deref())
        .await?;
    if !updated {
        return Err(AppError::Gone(anyhow::anyhow!("Invite is no longer valid")));
    }

    let invite = find_invite(state, code).await?;
    project_invite(&invite, Utc::now())
}

/// Patch an invite's contact details.
///
/// PATCH /invites/:code
pub async fn update_invite(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(patches): Json<Vec<InvitePatch>>,
) -> Result<Json<InviteResponse>, AppError> {
    let response = update_invite_impl(&state, &code, patches).await?;
    Ok(Json(response))
}

/// Complete an invitation - implementation.
///
/// Dispatches to one of three transaction shapes by invite kind. The invite
/// row is locked and disabled inside the transaction, so a second completion
/// of the same invite observes the disabled flag and gets Gone.
#[tracing::instrument(skip(state, code, req))]
pub async fn complete_invite_impl(
    state: &AppState,
    code: &str,
    req: CompleteInviteRequest,
) -> Result<CompleteInviteResponse, AppError> {
    let invite = find_invite(state, code).await?;
    let kind = invite
        .kind()
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Unknown invite kind code")))?;

    match kind {
        InviteKind::SelfRegistration => {
            let service_name = req.service_name.as_deref().ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("service_name is required"))
            })?;
            let service = Service::new(generate_external_id(), service_name.to_string());
            let user = build_invited_user(&invite, req.password)?;

            state
                .db
                .complete_self_registration(invite.id, &service, &user)
                .await?;

            tracing::info!(invite_id = %invite.id, "Self-registration completed");
            Ok(CompleteInviteResponse {
                user_external_id: user.external_id,
                service_external_id: Some(service.external_id),
            })
        }
        InviteKind::NewUser => {
            let service_id = invite.service_id.ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Invite has no target service"))
            })?;
            let user = build_invited_user(&invite, req.password)?;

            state
                .db
                .complete_new_user(invite.id, &user, service_id, &invite.role_name)
                .await?;

            tracing::info!(invite_id = %invite.id, "New-user invite completed");
            Ok(CompleteInviteResponse {
                user_external_id: user.external_id,
                service_external_id: service_external_id(state, service_id).await?,
            })
        }
        InviteKind::ExistingUser => {
            let service_id = invite.service_id.ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Invite has no target service"))
            })?;

            let user = state
                .db
                .complete_existing_user(invite.id, service_id, &invite.role_name)
                .await?;

            tracing::info!(invite_id = %invite.id, "Join invite completed");
            Ok(CompleteInviteResponse {
                user_external_id: user.external_id,
                service_external_id: service_external_id(state, service_id).await?,
            })
        }
    }
}

/// Complete an invitation.
///
/// POST /invites/:code/complete
pub async fn complete_invite(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<CompleteInviteRequest>,
) -> Result<Json<CompleteInviteResponse>, AppError> {
    let response = complete_invite_impl(&state, &code, req).await?;
    Ok(Json(response))
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn find_invite(state: &AppState, code: &str) -> Result<Invite, AppError> {
    state
        .db
        .find_invite_by_code(code)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invite not found")))
}

fn ensure_not_disabled(invite: &Invite) -> Result<(), AppError> {
    if invite.disabled {
        return Err(AppError::Gone(anyhow::anyhow!("Invite is no longer valid")));
    }
    Ok(())
}

/// Project an invite for a response. A row whose kind code no longer parses
/// is a corrupt record, reported the same way completion reports it.
fn project_invite(
    invite: &Invite,
    now: chrono::DateTime<Utc>,
) -> Result<InviteResponse, AppError> {
    InviteResponse::project(invite, now)
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Unknown invite kind code")))
}

/// Build the user record a completed invite creates. The invite's OTP secret
/// carries over as the user's active second-factor secret; possession was
/// proven during validation.
fn build_invited_user(invite: &Invite, password: Option<String>) -> Result<User, AppError> {
    let password_hash = match (invite.password_hash.clone(), password) {
        (Some(hash), _) => hash,
        (None, Some(password)) => {
            if password.len() < MIN_PASSWORD_LENGTH {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "password must be at least {} characters",
                    MIN_PASSWORD_LENGTH
                )));
            }
            hash_password(&Password::new(password))
                .map_err(AppError::InternalError)?
                .into_string()
        }
        (None, None) => {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "No password has been set for this invite"
            )))
        }
    };

    Ok(User::new(
        generate_external_id(),
        invite.email.clone(),
        password_hash,
        invite.telephone_number.clone(),
        invite.otp_key.clone(),
    ))
}

async fn service_external_id(
    state: &AppState,
    service_id: uuid::Uuid,
) -> Result<Option<String>, AppError> {
    Ok(state
        .db
        .find_service_by_id(service_id)
        .await?
        .map(|s| s.external_id))
}
