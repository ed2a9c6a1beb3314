//! Service-role administration handlers.
//!
//! Every change runs through a transaction that counts the remaining admins
//! before committing, so a service can never lose its last admin.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};

use crate::models::{Role, Service, UpdateServiceRoleRequest, User};
use crate::AppState;
use service_core::error::AppError;

/// Change a user's role within a service - implementation.
#[tracing::instrument(skip(state, service_external_id, user_external_id, req), fields(role_name = %req.role_name))]
pub async fn update_service_role_impl(
    state: &AppState,
    service_external_id: &str,
    user_external_id: &str,
    req: UpdateServiceRoleRequest,
) -> Result<Role, AppError> {
    let service = find_service(state, service_external_id).await?;
    let user = find_user(state, user_external_id).await?;

    let role = state
        .db
        .update_service_role(service.id, user.id, &req.role_name)
        .await?;

    tracing::info!(service_id = %service.id, user_id = %user.id, role = %role.name, "Service role updated");
    Ok(role)
}

/// Change a user's role within a service.
///
/// PUT /services/:service_external_id/users/:user_external_id/role
pub async fn update_service_role(
    State(state): State<AppState>,
    Path((service_external_id, user_external_id)): Path<(String, String)>,
    Json(req): Json<UpdateServiceRoleRequest>,
) -> Result<Json<Role>, AppError> {
    let response =
        update_service_role_impl(&state, &service_external_id, &user_external_id, req).await?;
    Ok(Json(response))
}

/// Remove a user from a service - implementation.
#[tracing::instrument(skip(state, service_external_id, user_external_id))]
pub async fn remove_service_user_impl(
    state: &AppState,
    service_external_id: &str,
    user_external_id: &str,
) -> Result<(), AppError> {
    let service = find_service(state, service_external_id).await?;
    let user = find_user(state, user_external_id).await?;

    state.db.remove_service_user(service.id, user.id).await?;

    tracing::info!(service_id = %service.id, user_id = %user.id, "User removed from service");
    Ok(())
}

/// Remove a user from a service.
///
/// DELETE /services/:service_external_id/users/:user_external_id
pub async fn remove_service_user(
    State(state): State<AppState>,
    Path((service_external_id, user_external_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    remove_service_user_impl(&state, &service_external_id, &user_external_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn find_service(state: &AppState, external_id: &str) -> Result<Service, AppError> {
    state
        .db
        .find_service_by_external_id(external_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))
}

async fn find_user(state: &AppState, external_id: &str) -> Result<User, AppError> {
    state
        .db
        .find_user_by_external_id(external_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))
}
