//! TOTP engine: passcode generation and verification against a shared
//! base32 secret, with a one-step window either side of the current time to
//! tolerate clock drift.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;

/// Digits in a generated passcode.
pub const OTP_DIGITS: u32 = 6;

/// TOTP time step in seconds.
pub const TIME_STEP_SECONDS: i64 = 30;

/// Steps accepted either side of the current window. Codes outside this
/// window are replays and must fail.
pub const VERIFY_WINDOW: i64 = 1;

/// Generate the passcode for the time window containing `at`.
pub fn generate(secret: &str, at: DateTime<Utc>) -> Result<String, anyhow::Error> {
    let counter = at.timestamp() / TIME_STEP_SECONDS;
    generate_at_counter(secret, counter)
}

/// Verify a submitted passcode against the current window plus/minus
/// [`VERIFY_WINDOW`] steps.
pub fn verify(secret: &str, submitted: &str, now: DateTime<Utc>) -> Result<bool, anyhow::Error> {
    let current = now.timestamp() / TIME_STEP_SECONDS;
    for counter in (current - VERIFY_WINDOW)..=(current + VERIFY_WINDOW) {
        if counter < 0 {
            continue;
        }
        if generate_at_counter(secret, counter)? == submitted {
            return Ok(true);
        }
    }
    Ok(false)
}

fn generate_at_counter(secret: &str, counter: i64) -> Result<String, anyhow::Error> {
    let key = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, secret)
        .ok_or_else(|| anyhow::anyhow!("OTP secret is not valid base32"))?;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key)
        .map_err(|e| anyhow::anyhow!("HMAC init failed: {}", e))?;
    mac.update(&(counter as u64).to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation per RFC 4226 section 5.3.
    let offset = (digest[19] & 0x0f) as usize;
    let binary_code = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    Ok(format!(
        "{:0width$}",
        binary_code % 10u32.pow(OTP_DIGITS),
        width = OTP_DIGITS as usize
    ))
}
