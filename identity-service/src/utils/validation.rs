//! Pure validation helpers for request payloads.

use crate::models::{InvitePatch, PatchField};

/// Minimum password length accepted anywhere a password is set.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Check a telephone number for E.164 shape: leading `+`, 8 to 15 digits.
pub fn is_valid_telephone_number(telephone_number: &str) -> bool {
    let Some(digits) = telephone_number.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Validate a set of invite patch operations. Returns the list of error
/// messages; an empty list means the patch is applicable.
pub fn validate_invite_patches(patches: &[InvitePatch]) -> Vec<String> {
    let mut errors = Vec::new();

    if patches.is_empty() {
        errors.push("Patch request must contain at least one operation".to_string());
    }

    for patch in patches {
        match patch.path {
            PatchField::TelephoneNumber => {
                if !is_valid_telephone_number(&patch.value) {
                    errors.push(format!(
                        "Field [telephone_number] must be a valid telephone number, got [{}]",
                        patch.value
                    ));
                }
            }
            PatchField::Password => {
                if patch.value.len() < MIN_PASSWORD_LENGTH {
                    errors.push(format!(
                        "Field [password] must be at least {} characters",
                        MIN_PASSWORD_LENGTH
                    ));
                }
            }
        }
    }

    errors
}
