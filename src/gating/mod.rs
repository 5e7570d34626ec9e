// Signer verification gate
//
// Resolves the signer of a stage against the identity directory and, when
// the signer has enrolled verification factors, holds the triggering action
// back until a valid one-time code is supplied.

pub mod authority;
pub mod directory;
pub mod normalize;
pub mod totp;

use thiserror::Error;

pub use authority::{DeferredAction, GatingAuthority, GatingChallenge, GatingOutcome};
pub use directory::{FactorSlot, Identity, IdentityDirectory, InMemoryDirectory, Secret, VerificationFactor};
pub use normalize::normalize_name;
pub use totp::TotpParams;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatingError {
    #[error("verification code must be {expected_digits} digits")]
    MalformedCode { expected_digits: u32 },

    #[error("verification code is invalid or expired (attempt {attempts})")]
    InvalidCode { attempts: u32 },

    #[error("challenge was already resolved")]
    AlreadyResolved,

    #[error("challenge does not belong to this record state: {reason}")]
    StaleChallenge { reason: String },
}
