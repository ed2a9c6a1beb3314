//! Invite model - the invitation lifecycle entity and its request types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Failed OTP validations tolerated before an invite is disabled.
pub const MAX_OTP_ATTEMPTS: i32 = 10;

/// Absolute invite lifetime, measured from creation.
pub const INVITE_TTL_DAYS: i64 = 2;

/// Invitation kind codes. The kind decides the shape of the completion
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteKind {
    /// Self-registration: completion creates a new service and its first
    /// admin user.
    SelfRegistration,
    /// A new user invited into an existing service.
    NewUser,
    /// An existing user invited to join a further service.
    ExistingUser,
}

impl InviteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteKind::SelfRegistration => "self_registration",
            InviteKind::NewUser => "new_user",
            InviteKind::ExistingUser => "existing_user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "self_registration" => Some(InviteKind::SelfRegistration),
            "new_user" => Some(InviteKind::NewUser),
            "existing_user" => Some(InviteKind::ExistingUser),
            _ => None,
        }
    }
}

/// Lifecycle state, computed at read time from the persisted flags and
/// timestamps. The store keeps only `disabled`, `verified_at`, `created_at`
/// and `expires_at`; there is no separate state column to drift out of sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteState {
    Created,
    OtpPending,
    Validated,
    Completed,
    Expired,
    Disabled,
}

impl InviteState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InviteState::Completed | InviteState::Expired | InviteState::Disabled
        )
    }
}

/// Invitation entity.
#[derive(Debug, Clone, FromRow)]
pub struct Invite {
    pub id: Uuid,
    pub code: String,
    pub kind: String,
    pub email: String,
    pub role_name: String,
    pub service_id: Option<Uuid>,
    pub sender_id: Option<Uuid>,
    pub telephone_number: Option<String>,
    pub password_hash: Option<String>,
    pub otp_key: String,
    pub attempt_counter: i32,
    pub disabled: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Invite {
    /// Create a new invite with a fresh OTP secret and lookup code.
    pub fn new(
        kind: InviteKind,
        email: String,
        role_name: String,
        service_id: Option<Uuid>,
        sender_id: Option<Uuid>,
        code: String,
        otp_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code,
            kind: kind.as_str().to_string(),
            email,
            role_name,
            service_id,
            sender_id,
            telephone_number: None,
            password_hash: None,
            otp_key,
            attempt_counter: 0,
            disabled: false,
            verified_at: None,
            created_at: now,
            expires_at: now + Duration::days(INVITE_TTL_DAYS),
        }
    }

    pub fn kind(&self) -> Option<InviteKind> {
        InviteKind::parse(&self.kind)
    }

    /// True once the absolute TTL has elapsed, independent of any later
    /// mutation.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Project the lifecycle state from the persisted flags.
    ///
    /// A disabled invite that was validated first is a completed one; the
    /// disabled flag set during completion is the only completion marker.
    pub fn state_at(&self, now: DateTime<Utc>) -> InviteState {
        if self.disabled {
            if self.verified_at.is_some() {
                InviteState::Completed
            } else {
                InviteState::Disabled
            }
        } else if self.is_expired_at(now) {
            InviteState::Expired
        } else if self.verified_at.is_some() {
            InviteState::Validated
        } else if self.telephone_number.is_some() {
            InviteState::OtpPending
        } else {
            InviteState::Created
        }
    }
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Request to create an invitation.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateInviteRequest {
    pub kind: InviteKind,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub role_name: String,
    /// Target service; required for every kind except self-registration.
    pub service_external_id: Option<String>,
    /// External id of the inviting user, when sent by a service admin.
    pub sender_external_id: Option<String>,
}

/// Request to set up the OTP leg of an invite.
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateOtpRequest {
    #[validate(length(min = 1))]
    pub telephone_number: String,
    /// Pre-set password, hashed before storage.
    pub password: Option<String>,
}

/// Request to validate a submitted passcode.
#[derive(Debug, Deserialize, Validate)]
pub struct ValidateOtpRequest {
    #[validate(length(min = 1))]
    pub otp: String,
}

/// Patch operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Replace,
}

/// Fields an invite patch may replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchField {
    TelephoneNumber,
    Password,
}

/// A single typed patch operation on an invite.
#[derive(Debug, Deserialize)]
pub struct InvitePatch {
    pub op: PatchOp,
    pub path: PatchField,
    pub value: String,
}

/// Invite projection for API callers. Never carries the OTP secret or the
/// password hash.
#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub code: String,
    pub kind: InviteKind,
    pub email: String,
    pub role_name: String,
    pub telephone_number: Option<String>,
    pub attempt_counter: i32,
    pub disabled: bool,
    pub state: InviteState,
    pub expires_at: DateTime<Utc>,
}

impl InviteResponse {
    /// `None` when the stored kind code is unrecognized; callers report the
    /// corrupt record rather than guessing a kind.
    pub fn project(invite: &Invite, now: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            code: invite.code.clone(),
            kind: invite.kind()?,
            email: invite.email.clone(),
            role_name: invite.role_name.clone(),
            telephone_number: invite.telephone_number.clone(),
            attempt_counter: invite.attempt_counter,
            disabled: invite.disabled,
            state: invite.state_at(now),
            expires_at: invite.expires_at,
        })
    }
}

/// Response after a completed invitation.
#[derive(Debug, Serialize)]
pub struct CompleteInviteResponse {
    pub user_external_id: String,
    pub service_external_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Invite {
        Invite::new(
            InviteKind::NewUser,
            "invitee@example.com".to_string(),
            "view-only".to_string(),
            Some(Uuid::new_v4()),
            Some(Uuid::new_v4()),
            "code-1234".to_string(),
            "GEZDGNBVGY3TQOJQ".to_string(),
        )
    }

    #[test]
    fn fresh_invite_is_created() {
        let inv = invite();
        assert_eq!(inv.state_at(Utc::now()), InviteState::Created);
        assert_eq!(inv.attempt_counter, 0);
        assert!(!inv.disabled);
    }

    #[test]
    fn telephone_number_moves_to_otp_pending() {
        let mut inv = invite();
        inv.telephone_number = Some("+447700900000".to_string());
        assert_eq!(inv.state_at(Utc::now()), InviteState::OtpPending);
    }

    #[test]
    fn verified_invite_is_validated() {
        let mut inv = invite();
        inv.telephone_number = Some("+447700900000".to_string());
        inv.verified_at = Some(Utc::now());
        assert_eq!(inv.state_at(Utc::now()), InviteState::Validated);
    }

    #[test]
    fn ttl_is_anchored_to_creation() {
        let mut inv = invite();
        inv.created_at = Utc::now() - Duration::days(100);
        inv.expires_at = inv.created_at + Duration::days(INVITE_TTL_DAYS);
        assert!(inv.is_expired_at(Utc::now()));
        assert_eq!(inv.state_at(Utc::now()), InviteState::Expired);
        // Expired but not disabled: the flag stays untouched.
        assert!(!inv.disabled);
    }

    #[test]
    fn disabled_wins_over_expiry() {
        let mut inv = invite();
        inv.disabled = true;
        inv.expires_at = Utc::now() - Duration::days(1);
        assert_eq!(inv.state_at(Utc::now()), InviteState::Disabled);
        assert!(inv.state_at(Utc::now()).is_terminal());
    }

    #[test]
    fn validated_then_disabled_projects_as_completed() {
        let mut inv = invite();
        inv.verified_at = Some(Utc::now());
        inv.disabled = true;
        assert_eq!(inv.state_at(Utc::now()), InviteState::Completed);
        assert!(inv.state_at(Utc::now()).is_terminal());
    }

    #[test]
    fn kind_codes_round_trip() {
        for kind in [
            InviteKind::SelfRegistration,
            InviteKind::NewUser,
            InviteKind::ExistingUser,
        ] {
            assert_eq!(InviteKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(InviteKind::parse("unknown"), None);
    }

    #[test]
    fn response_projection_hides_secrets() {
        let inv = invite();
        let response = InviteResponse::project(&inv, Utc::now()).unwrap();
        let json = serde_json::to_value(response).unwrap();
        assert!(json.get("otp_key").is_none());
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["state"], "created");
    }

    #[test]
    fn unrecognized_kind_code_does_not_project() {
        let mut inv = invite();
        inv.kind = "sorcery".to_string();
        assert!(InviteResponse::project(&inv, Utc::now()).is_none());
    }
}
