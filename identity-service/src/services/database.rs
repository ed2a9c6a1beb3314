//! PostgreSQL persistence for the identity service.
//!
//! Every query lives behind the [`Database`] wrapper. The race-sensitive
//! mutations (attempt counters, invite completion, role changes) are single
//! conditional statements or short transactions holding a row lock, so two
//! concurrent callers can never both observe the pre-update state.

use chrono::Utc;
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::models::invite::MAX_OTP_ATTEMPTS;
use crate::models::user::MAX_LOGIN_ATTEMPTS;
use crate::models::{Invite, Role, Service, ServiceRole, User, ADMIN_ROLE};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }

    // ==================== Invite Operations ====================

    /// Insert a new invite.
    pub async fn insert_invite(&self, invite: &Invite) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO invites (id, code, kind, email, role_name, service_id, sender_id,
                                 telephone_number, password_hash, otp_key, attempt_counter,
                                 disabled, verified_at, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(invite.id)
        .bind(&invite.code)
        .bind(&invite.kind)
        .bind(&invite.email)
        .bind(&invite.role_name)
        .bind(invite.service_id)
        .bind(invite.sender_id)
        .bind(&invite.telephone_number)
        .bind(&invite.password_hash)
        .bind(&invite.otp_key)
        .bind(invite.attempt_counter)
        .bind(invite.disabled)
        .bind(invite.verified_at)
        .bind(invite.created_at)
        .bind(invite.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find an invite by its external lookup code.
    pub async fn find_invite_by_code(&self, code: &str) -> Result<Option<Invite>, AppError> {
        sqlx::query_as::<_, Invite>("SELECT * FROM invites WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find a non-disabled invite for an email, optionally scoped to a
    /// service. Backs the duplicate-invite check at creation.
    pub async fn find_active_invite_by_email(
        &self,
        email: &str,
        service_id: Option<Uuid>,
    ) -> Result<Option<Invite>, AppError> {
        sqlx::query_as::<_, Invite>(
            r#"
            SELECT * FROM invites
            WHERE LOWER(email) = LOWER($1)
              AND NOT disabled
              AND ($2::uuid IS NULL OR service_id = $2)
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Store contact details for an invite: telephone number and password
    /// hash, each left untouched when absent. A single statement, so a
    /// multi-field patch applies entirely or not at all. Disabled invites
    /// are never touched.
    pub async fn update_invite_contact(
        &self,
        invite_id: Uuid,
        telephone_number: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE invites
            SET telephone_number = COALESCE($2, telephone_number),
                password_hash = COALESCE($3, password_hash)
            WHERE id = $1 AND NOT disabled
            "#,
        )
        .bind(invite_id)
        .bind(telephone_number)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    /// Swap in a freshly generated OTP secret. A single UPDATE, so codes
    /// derived from the old secret are invalid the moment this returns.
    pub async fn rotate_invite_otp_key(
        &self,
        invite_id: Uuid,
        otp_key: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE invites SET otp_key = $2 WHERE id = $1 AND NOT disabled")
            .bind(invite_id)
            .bind(otp_key)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a failed OTP attempt: bump the counter and disable the invite
    /// in the same statement once the bound is hit.
    ///
    /// Returns the post-increment counter and disabled flag, or `None` when
    /// the invite was already disabled by a concurrent caller.
    pub async fn record_invite_otp_failure(
        &self,
        invite_id: Uuid,
    ) -> Result<Option<(i32, bool)>, AppError> {
        sqlx::query_as::<_, (i32, bool)>(
            r#"
            UPDATE invites
            SET attempt_counter = attempt_counter + 1,
                disabled = disabled OR attempt_counter + 1 >= $2
            WHERE id = $1 AND NOT disabled
            RETURNING attempt_counter, disabled
            "#,
        )
        .bind(invite_id)
        .bind(MAX_OTP_ATTEMPTS)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Mark an invite validated and clear its attempt counter. Conditional
    /// on not being disabled and not already validated, so a repeat of the
    /// same correct passcode cannot succeed twice.
    pub async fn mark_invite_validated(&self, invite_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE invites
            SET verified_at = $2, attempt_counter = 0
            WHERE id = $1 AND NOT disabled AND verified_at IS NULL
            "#,
        )
        .bind(invite_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    // ==================== Invite Completion ====================

    /// Complete a self-registration invite: new service, new admin user, the
    /// admin binding and invite disablement in one transaction.
    pub async fn complete_self_registration(
        &self,
        invite_id: Uuid,
        service: &Service,
        user: &User,
    ) -> Result<(), AppError> {
        let mut tx = self.begin().await?;

        let invite = lock_completable_invite(&mut tx, invite_id).await?;
        ensure_email_free(&mut tx, &invite.email).await?;

        let admin = find_role_by_name_tx(&mut tx, ADMIN_ROLE).await?;
        insert_service_tx(&mut tx, service).await?;
        insert_user_tx(&mut tx, user).await?;
        insert_service_role_tx(&mut tx, service.id, user.id, admin.id).await?;
        disable_invite_tx(&mut tx, invite_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Complete a new-user invite: create the user and bind it to the
    /// invite's service with the invited role.
    pub async fn complete_new_user(
        &self,
        invite_id: Uuid,
        user: &User,
        service_id: Uuid,
        role_name: &str,
    ) -> Result<(), AppError> {
        let mut tx = self.begin().await?;

        let invite = lock_completable_invite(&mut tx, invite_id).await?;
        ensure_email_free(&mut tx, &invite.email).await?;

        let role = find_role_by_name_tx(&mut tx, role_name).await?;
        insert_user_tx(&mut tx, user).await?;
        insert_service_role_tx(&mut tx, service_id, user.id, role.id).await?;
        disable_invite_tx(&mut tx, invite_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Complete an existing-user invite: bind the user found by the
    /// invite's email to the target service. The already-has-role check is
    /// repeated here, at commit time, not just at invite creation.
    pub async fn complete_existing_user(
        &self,
        invite_id: Uuid,
        service_id: Uuid,
        role_name: &str,
    ) -> Result<User, AppError> {
        let mut tx = self.begin().await?;

        let invite = lock_completable_invite(&mut tx, invite_id).await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(&invite.email)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

        let existing = sqlx::query_as::<_, ServiceRole>(
            "SELECT * FROM service_roles WHERE service_id = $1 AND user_id = $2",
        )
        .bind(service_id)
        .bind(user.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        if existing.is_some() {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "User already has a role in this service"
            )));
        }

        let role = find_role_by_name_tx(&mut tx, role_name).await?;
        insert_service_role_tx(&mut tx, service_id, user.id, role.id).await?;
        disable_invite_tx(&mut tx, invite_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(user)
    }

    // ==================== User Operations ====================

    /// Find user by email (case-insensitive).
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find user by external id.
    pub async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Record a failed authentication: bump the login counter and disable
    /// the account in the same statement once the bound is hit.
    pub async fn record_login_failure(
        &self,
        user_id: Uuid,
    ) -> Result<Option<(i32, bool)>, AppError> {
        sqlx::query_as::<_, (i32, bool)>(
            r#"
            UPDATE users
            SET login_counter = login_counter + 1,
                disabled = disabled OR login_counter + 1 >= $2,
                updated_at = NOW()
            WHERE id = $1 AND NOT disabled
            RETURNING login_counter, disabled
            "#,
        )
        .bind(user_id)
        .bind(MAX_LOGIN_ATTEMPTS)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Clear the login counter after a successful authentication.
    pub async fn clear_login_counter(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET login_counter = 0, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Administrative reset: the only way back from a lockout.
    pub async fn reset_login_counter(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET login_counter = 0, disabled = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Store a provisional OTP secret, leaving the active one untouched.
    pub async fn set_provisional_otp_key(
        &self,
        user_id: Uuid,
        otp_key: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET provisional_otp_key = $2,
                provisional_otp_key_created_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(otp_key)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Promote the provisional OTP secret to active and clear the
    /// provisional fields. Conditional on a provisional secret existing, so
    /// a stale replay finds nothing to promote.
    pub async fn promote_provisional_otp_key(
        &self,
        user_id: Uuid,
        second_factor: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET otp_key = provisional_otp_key,
                provisional_otp_key = NULL,
                provisional_otp_key_created_at = NULL,
                second_factor = $2,
                updated_at = NOW()
            WHERE id = $1 AND provisional_otp_key IS NOT NULL
            "#,
        )
        .bind(user_id)
        .bind(second_factor)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    // ==================== Service / Role Operations ====================

    /// Find service by internal id.
    pub async fn find_service_by_id(&self, id: Uuid) -> Result<Option<Service>, AppError> {
        sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find service by external id.
    pub async fn find_service_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Service>, AppError> {
        sqlx::query_as::<_, Service>("SELECT * FROM services WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find role by name.
    pub async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find a user's role binding in a service.
    pub async fn find_service_role(
        &self,
        service_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ServiceRole>, AppError> {
        sqlx::query_as::<_, ServiceRole>(
            "SELECT * FROM service_roles WHERE service_id = $1 AND user_id = $2",
        )
        .bind(service_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Change a user's role within a service, holding the service row lock
    /// while the minimum-admin count is taken.
    pub async fn update_service_role(
        &self,
        service_id: Uuid,
        user_id: Uuid,
        role_name: &str,
    ) -> Result<Role, AppError> {
        let mut tx = self.begin().await?;

        lock_service_tx(&mut tx, service_id).await?;

        let new_role = find_role_by_name_tx(&mut tx, role_name).await?;

        let current = sqlx::query_as::<_, ServiceRole>(
            "SELECT * FROM service_roles WHERE service_id = $1 AND user_id = $2",
        )
        .bind(service_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?
        .ok_or_else(|| {
            AppError::PreconditionFailed(anyhow::anyhow!("User does not belong to this service"))
        })?;

        // Downgrading the last admin would leave the service unmanageable.
        if !new_role.is_admin() {
            let current_role = find_role_by_id_tx(&mut tx, current.role_id).await?;
            if current_role.is_admin()
                && count_other_admins_tx(&mut tx, service_id, user_id).await? == 0
            {
                return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                    "Service admin limit reached"
                )));
            }
        }

        sqlx::query(
            "UPDATE service_roles SET role_id = $3 WHERE service_id = $1 AND user_id = $2",
        )
        .bind(service_id)
        .bind(user_id)
        .bind(new_role.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(new_role)
    }

    /// Remove a user from a service, refusing to remove the last admin.
    pub async fn remove_service_user(
        &self,
        service_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let mut tx = self.begin().await?;

        lock_service_tx(&mut tx, service_id).await?;

        let current = sqlx::query_as::<_, ServiceRole>(
            "SELECT * FROM service_roles WHERE service_id = $1 AND user_id = $2",
        )
        .bind(service_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found in this service")))?;

        let current_role = find_role_by_id_tx(&mut tx, current.role_id).await?;
        if current_role.is_admin() && count_other_admins_tx(&mut tx, service_id, user_id).await? == 0
        {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Service admin limit reached"
            )));
        }

        sqlx::query("DELETE FROM service_roles WHERE service_id = $1 AND user_id = $2")
            .bind(service_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }
}

// ==================== Transaction Helpers ====================

/// Lock an invite row for completion and verify it is still completable:
/// not disabled (Gone on a repeat completion), within its TTL, validated.
async fn lock_completable_invite(
    tx: &mut Transaction<'_, Postgres>,
    invite_id: Uuid,
) -> Result<Invite, AppError> {
    let invite = sqlx::query_as::<_, Invite>("SELECT * FROM invites WHERE id = $1 FOR UPDATE")
        .bind(invite_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invite not found")))?;

    if invite.disabled {
        return Err(AppError::Gone(anyhow::anyhow!("Invite is no longer valid")));
    }
    if invite.is_expired_at(Utc::now()) {
        return Err(AppError::Gone(anyhow::anyhow!("Invite has expired")));
    }
    if invite.verified_at.is_none() {
        return Err(AppError::PreconditionFailed(anyhow::anyhow!(
            "Invite has not been validated"
        )));
    }
    Ok(invite)
}

/// Conflict when a user with this email already exists. Checked inside the
/// completion transaction; the unique index on LOWER(email) is the backstop
/// for completions racing on different invite rows.
async fn ensure_email_free(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
) -> Result<(), AppError> {
    let existing = sqlx::query_as::<_, (Uuid,)>("SELECT id FROM users WHERE LOWER(email) = LOWER($1)")
        .bind(email)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    if existing.is_some() {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "User with this email already exists"
        )));
    }
    Ok(())
}

async fn find_role_by_name_tx(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
) -> Result<Role, AppError> {
    sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE name = $1")
        .bind(name)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Role not found")))
}

async fn find_role_by_id_tx(
    tx: &mut Transaction<'_, Postgres>,
    role_id: Uuid,
) -> Result<Role, AppError> {
    sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
        .bind(role_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Role not found")))
}

/// Serialize role changes per service by locking the service row.
async fn lock_service_tx(
    tx: &mut Transaction<'_, Postgres>,
    service_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query_as::<_, (Uuid,)>("SELECT id FROM services WHERE id = $1 FOR UPDATE")
        .bind(service_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))?;
    Ok(())
}

/// Count admin bindings for a service, excluding the binding being changed.
async fn count_other_admins_tx(
    tx: &mut Transaction<'_, Postgres>,
    service_id: Uuid,
    user_id: Uuid,
) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM service_roles sr
        JOIN roles r ON r.id = sr.role_id
        WHERE sr.service_id = $1 AND r.name = $2 AND sr.user_id <> $3
        "#,
    )
    .bind(service_id)
    .bind(ADMIN_ROLE)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    Ok(count)
}

async fn insert_service_tx(
    tx: &mut Transaction<'_, Postgres>,
    service: &Service,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO services (id, external_id, name, created_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(service.id)
    .bind(&service.external_id)
    .bind(&service.name)
    .bind(service.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    Ok(())
}

async fn insert_user_tx(tx: &mut Transaction<'_, Postgres>, user: &User) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO users (id, external_id, email, password_hash, telephone_number, otp_key,
                           provisional_otp_key, provisional_otp_key_created_at, second_factor,
                           login_counter, disabled, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(user.id)
    .bind(&user.external_id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.telephone_number)
    .bind(&user.otp_key)
    .bind(&user.provisional_otp_key)
    .bind(user.provisional_otp_key_created_at)
    .bind(&user.second_factor)
    .bind(user.login_counter)
    .bind(user.disabled)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(anyhow::anyhow!("User with this email already exists"))
        }
        _ => AppError::DatabaseError(anyhow::anyhow!(e)),
    })?;
    Ok(())
}

async fn insert_service_role_tx(
    tx: &mut Transaction<'_, Postgres>,
    service_id: Uuid,
    user_id: Uuid,
    role_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO service_roles (service_id, user_id, role_id) VALUES ($1, $2, $3)")
        .bind(service_id)
        .bind(user_id)
        .bind(role_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    Ok(())
}

async fn disable_invite_tx(
    tx: &mut Transaction<'_, Postgres>,
    invite_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query("UPDATE invites SET disabled = TRUE WHERE id = $1")
        .bind(invite_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    Ok(())
}
