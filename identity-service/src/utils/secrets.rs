//! Cryptographically secure generation of invite codes, OTP secrets and
//! external identifiers. All randomness comes from the OS generator; none of
//! these values is ever derived from user input.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use uuid::Uuid;

/// Length of an invite lookup code.
pub const INVITE_CODE_LENGTH: usize = 32;

/// Raw OTP secret length before base32 encoding; 10 bytes encode to 16
/// base32 characters.
pub const OTP_SECRET_BYTES: usize = 10;

/// Generate an unguessable invite code used as the external lookup key.
pub fn generate_invite_code() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(INVITE_CODE_LENGTH)
        .map(char::from)
        .collect()
}

/// Generate a base32-encoded shared secret for TOTP derivation.
pub fn generate_otp_secret() -> String {
    let mut bytes = [0u8; OTP_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &bytes)
}

/// Generate an immutable external id for a newly created user or service.
pub fn generate_external_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_codes_are_fixed_length_alphanumeric() {
        let code = generate_invite_code();
        assert_eq!(code.len(), INVITE_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn invite_codes_do_not_repeat() {
        assert_ne!(generate_invite_code(), generate_invite_code());
    }

    #[test]
    fn otp_secrets_are_valid_base32() {
        let secret = generate_otp_secret();
        assert_eq!(secret.len(), 16);
        let decoded = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &secret)
            .expect("secret must decode");
        assert_eq!(decoded.len(), OTP_SECRET_BYTES);
    }

    #[test]
    fn external_ids_are_opaque_hex() {
        let id = generate_external_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
