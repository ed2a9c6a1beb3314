//! User model - platform accounts with second-factor credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Failed authentication attempts tolerated before an account is disabled.
pub const MAX_LOGIN_ATTEMPTS: i32 = 10;

/// Second-factor delivery method codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondFactorMethod {
    /// Passcode delivered over SMS.
    Sms,
    /// Passcode read from an authenticator app.
    App,
}

impl SecondFactorMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecondFactorMethod::Sms => "sms",
            SecondFactorMethod::App => "app",
        }
    }
}

/// User entity. `external_id` is the immutable identifier handed to other
/// services; `email` is unique case-insensitively.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    pub password_hash: String,
    pub telephone_number: Option<String>,
    pub otp_key: String,
    pub provisional_otp_key: Option<String>,
    pub provisional_otp_key_created_at: Option<DateTime<Utc>>,
    pub second_factor: String,
    pub login_counter: i32,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user record.
    pub fn new(
        external_id: String,
        email: String,
        password_hash: String,
        telephone_number: Option<String>,
        otp_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id,
            email,
            password_hash,
            telephone_number,
            otp_key,
            provisional_otp_key: None,
            provisional_otp_key_created_at: None,
            second_factor: SecondFactorMethod::Sms.as_str().to_string(),
            login_counter: 0,
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Request to authenticate with email and password.
#[derive(Debug, Deserialize, Validate)]
pub struct AuthenticateRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Request to activate a provisioned second factor.
#[derive(Debug, Deserialize, Validate)]
pub struct SecondFactorActivateRequest {
    pub method: SecondFactorMethod,
    #[validate(length(min = 1))]
    pub code: String,
}

/// User projection for API callers. Never carries the password hash or OTP
/// secrets.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub external_id: String,
    pub email: String,
    pub telephone_number: Option<String>,
    pub second_factor: String,
    pub login_counter: i32,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            external_id: u.external_id,
            email: u.email,
            telephone_number: u.telephone_number,
            second_factor: u.second_factor,
            login_counter: u.login_counter,
            disabled: u.disabled,
            created_at: u.created_at,
        }
    }
}
