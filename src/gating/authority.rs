use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::directory::{FactorSlot, Identity, IdentityDirectory, Secret};
use super::normalize::normalize_name;
use super::totp::{self, TotpParams};
use super::GatingError;
use crate::errors::{AmbiguityReason, IdentityAmbiguity};
use crate::workflow::types::{ResolvedIdentity, VerificationStamp};

/// Work held back by a challenge, resumed once the code checks out
pub trait DeferredAction {
    type Output;

    fn resume(self, stamp: VerificationStamp) -> Self::Output;
}

#[derive(Debug, Clone)]
struct EligibleFactor {
    slot: FactorSlot,
    secret: Secret,
}

/// A pending verification for one signer
#[derive(Debug)]
pub struct GatingChallenge<A> {
    id: Uuid,
    identity: ResolvedIdentity,
    factors: Vec<EligibleFactor>,
    action: Option<A>,
    verified: Option<VerificationStamp>,
    failed_attempts: u32,
    issued_at: DateTime<Utc>,
}

impl<A> GatingChallenge<A> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &ResolvedIdentity {
        &self.identity
    }

    pub fn eligible_factors(&self) -> Vec<FactorSlot> {
        self.factors.iter().map(|f| f.slot).collect()
    }

    /// The held-back action, while the challenge is still pending
    pub fn action(&self) -> Option<&A> {
        self.action.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.action.is_some()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Put an action back after its resumed work failed downstream. The code
    /// already checked out, so the next resolve replays `stamp` instead of
    /// asking for another code.
    pub(crate) fn reinstate(&mut self, action: A, stamp: VerificationStamp) {
        warn!(
            challenge_id = %self.id,
            signer = %self.identity.name,
            "Verified challenge reinstated for retry"
        );
        self.action = Some(action);
        self.verified = Some(stamp);
    }

    /// Abandon the challenge. The deferred action is dropped without running.
    pub fn cancel(mut self) {
        if self.action.take().is_some() {
            info!(
                challenge_id = %self.id,
                signer = %self.identity.name,
                "Verification challenge cancelled"
            );
        }
    }
}

/// Result of evaluating a signer
#[derive(Debug)]
pub enum GatingOutcome<A> {
    /// No verification needed; the action is handed straight back
    Proceed(A),
    Challenge(GatingChallenge<A>),
}

pub struct GatingAuthority {
    directory: Arc<dyn IdentityDirectory>,
    params: TotpParams,
}

impl GatingAuthority {
    pub fn new(directory: Arc<dyn IdentityDirectory>, params: TotpParams) -> Self {
        Self { directory, params }
    }

    pub fn params(&self) -> &TotpParams {
        &self.params
    }

    /// Resolve the signer and decide whether `action` must wait for a code.
    ///
    /// Exactly one compatible identity is required. With no enabled factor the
    /// action proceeds unverified; otherwise a challenge is returned.
    pub fn evaluate<A>(
        &self,
        signer_name: &str,
        signer_role: Option<&str>,
        action: A,
    ) -> Result<GatingOutcome<A>, IdentityAmbiguity> {
        let wanted_name = normalize_name(signer_name);
        let wanted_role = signer_role.map(normalize_name).filter(|r| !r.is_empty());

        let ambiguity = |reason| IdentityAmbiguity {
            signer: signer_name.to_string(),
            role: signer_role.map(str::to_string),
            reason,
        };

        if wanted_name.is_empty() {
            return Err(ambiguity(AmbiguityReason::NotFound));
        }

        let named: Vec<Identity> = self
            .directory
            .find_by_name_and_role(signer_name, signer_role)
            .into_iter()
            .filter(|candidate| normalize_name(&candidate.name) == wanted_name)
            .collect();

        let compatible: Vec<&Identity> = named
            .iter()
            .filter(|candidate| role_compatible(candidate, wanted_role.as_deref()))
            .collect();

        let identity = match compatible.as_slice() {
            [] if named.is_empty() => return Err(ambiguity(AmbiguityReason::NotFound)),
            [] => {
                return Err(ambiguity(AmbiguityReason::RoleMismatch {
                    directory_roles: named.iter().map(|c| c.role.clone()).collect(),
                }))
            }
            [only] => *only,
            many => {
                return Err(ambiguity(AmbiguityReason::MultipleCandidates {
                    count: many.len(),
                }))
            }
        };

        let factors: Vec<EligibleFactor> = identity
            .enabled_factors()
            .into_iter()
            .map(|f| EligibleFactor {
                slot: f.slot,
                secret: f.secret.clone(),
            })
            .collect();

        if factors.is_empty() {
            info!(signer = %identity.name, "Signer has no verification factor enabled");
            return Ok(GatingOutcome::Proceed(action));
        }

        let challenge = GatingChallenge {
            id: Uuid::new_v4(),
            identity: ResolvedIdentity {
                name: identity.name.clone(),
                role: identity.role.clone(),
                sector: identity.sector.clone(),
            },
            factors,
            action: Some(action),
            verified: None,
            failed_attempts: 0,
            issued_at: Utc::now(),
        };
        info!(
            challenge_id = %challenge.id,
            signer = %challenge.identity.name,
            factors = ?challenge.eligible_factors(),
            "Verification challenge issued"
        );
        Ok(GatingOutcome::Challenge(challenge))
    }

    pub fn resolve_challenge<A: DeferredAction>(
        &self,
        challenge: &mut GatingChallenge<A>,
        code: &str,
    ) -> Result<A::Output, GatingError> {
        self.resolve_challenge_at(challenge, code, Utc::now())
    }

    /// Check `code` as of `at`; on success run the deferred action with the
    /// verification stamp. A failed attempt leaves the challenge pending.
    pub fn resolve_challenge_at<A: DeferredAction>(
        &self,
        challenge: &mut GatingChallenge<A>,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<A::Output, GatingError> {
        if !challenge.is_pending() {
            return Err(GatingError::AlreadyResolved);
        }

        if let Some(stamp) = challenge.verified.take() {
            let action = challenge.action.take().ok_or(GatingError::AlreadyResolved)?;
            info!(
                challenge_id = %challenge.id,
                signer = %stamp.identity.name,
                method = %stamp.method,
                "Verified challenge resumed"
            );
            return Ok(action.resume(stamp));
        }

        let code = code.trim();
        if !self.params.is_well_formed(code) {
            return Err(GatingError::MalformedCode {
                expected_digits: self.params.digits,
            });
        }

        let unix_seconds = u64::try_from(at.timestamp()).unwrap_or(0);
        let matched = challenge
            .factors
            .iter()
            .find(|f| totp::verify(f.secret.expose(), code, unix_seconds, &self.params))
            .map(|f| f.slot);

        let Some(slot) = matched else {
            challenge.failed_attempts += 1;
            warn!(
                challenge_id = %challenge.id,
                signer = %challenge.identity.name,
                attempts = challenge.failed_attempts,
                "Verification code rejected"
            );
            return Err(GatingError::InvalidCode {
                attempts: challenge.failed_attempts,
            });
        };

        let action = challenge.action.take().ok_or(GatingError::AlreadyResolved)?;
        let stamp = VerificationStamp {
            method: format!("totp:{slot}"),
            verified_at: at,
            identity: challenge.identity.clone(),
        };
        info!(
            challenge_id = %challenge.id,
            signer = %stamp.identity.name,
            method = %stamp.method,
            "Verification challenge resolved"
        );
        Ok(action.resume(stamp))
    }
}

fn role_compatible(candidate: &Identity, wanted_role: Option<&str>) -> bool {
    match wanted_role {
        None => true,
        Some(role) => candidate.elevated || normalize_name(&candidate.role) == role,
    }
}
