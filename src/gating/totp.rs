// Time-based one-time codes (RFC 6238, HMAC-SHA1)

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::ops::RangeInclusive;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Code lengths RFC 4226 allows for a 31-bit truncated value
pub const SUPPORTED_DIGITS: RangeInclusive<u32> = 6..=8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpParams {
    pub digits: u32,
    pub step_seconds: u64,
    /// Accepted steps before and after the current one
    pub skew_steps: u64,
}

impl Default for TotpParams {
    fn default() -> Self {
        Self {
            digits: 6,
            step_seconds: 30,
            skew_steps: 1,
        }
    }
}

impl TotpParams {
    pub fn is_supported(&self) -> bool {
        SUPPORTED_DIGITS.contains(&self.digits)
    }

    /// Unsupported digit counts accept nothing
    pub fn is_well_formed(&self, code: &str) -> bool {
        self.is_supported()
            && code.len() == self.digits as usize
            && code.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn counter_at(&self, unix_seconds: u64) -> u64 {
        unix_seconds / self.step_seconds.max(1)
    }
}

/// HOTP value for `counter`, zero-padded to `digits`. Empty when `digits`
/// is outside [`SUPPORTED_DIGITS`].
pub fn hotp(secret: &[u8], counter: u64, digits: u32) -> String {
    if !SUPPORTED_DIGITS.contains(&digits) {
        return String::new();
    }
    let mut mac = match HmacSha1::new_from_slice(secret) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    let code = binary % 10u32.pow(digits);
    format!("{:0width$}", code, width = digits as usize)
}

/// Code valid at `unix_seconds`
pub fn generate(secret: &[u8], unix_seconds: u64, params: &TotpParams) -> String {
    hotp(secret, params.counter_at(unix_seconds), params.digits)
}

/// Check `code` against the window around `unix_seconds`
pub fn verify(secret: &[u8], code: &str, unix_seconds: u64, params: &TotpParams) -> bool {
    if !params.is_well_formed(code) {
        return false;
    }
    let counter = params.counter_at(unix_seconds);
    let first = counter.saturating_sub(params.skew_steps);
    let last = counter.saturating_add(params.skew_steps);

    let mut matched = false;
    for step in first..=last {
        let expected = hotp(secret, step, params.digits);
        matched |= bool::from(expected.as_bytes().ct_eq(code.as_bytes()));
    }
    matched
}
