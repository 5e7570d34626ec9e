// Error taxonomy for the stage workflow core.
//
// Each component raises its own error type; WorkflowError is the single
// surface the coordinator hands back to callers.

use thiserror::Error;

use crate::gating::GatingError;
use crate::persistence::PersistenceError;
use crate::sequence::AllocationError;
use crate::workflow::types::RecordStatus;

/// Navigation or edit refused by the advancement guard
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardRejection {
    #[error("stage {target} not yet reached (active stage is {current})")]
    NotYetReached { target: usize, current: usize },

    #[error("stage {target} is locked while the record is {status}")]
    Locked { target: usize, status: RecordStatus },

    #[error("stage {target} does not exist")]
    NoSuchStage { target: usize },

    #[error("stage {index} is frozen in history")]
    StageFrozen { index: usize },

    #[error("no stage left to advance past (active stage index is {current})")]
    StagesExhausted { current: usize },
}

/// Why a signer could not be resolved to a single directory identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmbiguityReason {
    NotFound,
    RoleMismatch { directory_roles: Vec<String> },
    MultipleCandidates { count: usize },
}

impl std::fmt::Display for AmbiguityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AmbiguityReason::NotFound => write!(f, "no directory entry matches the signer"),
            AmbiguityReason::RoleMismatch { directory_roles } => write!(
                f,
                "signer found with incompatible role(s): {}",
                directory_roles.join(", ")
            ),
            AmbiguityReason::MultipleCandidates { count } => {
                write!(f, "{count} directory entries match the signer")
            }
        }
    }
}

/// The signer of a gated stage could not be uniquely and compatibly resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot resolve signer '{signer}' ({}): {reason}", role.as_deref().unwrap_or("no role"))]
pub struct IdentityAmbiguity {
    pub signer: String,
    pub role: Option<String>,
    pub reason: AmbiguityReason,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("guard rejected request: {0}")]
    GuardRejection(#[from] GuardRejection),

    #[error("sequence allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("verification failed: {0}")]
    Gating(#[from] GatingError),

    #[error("identity ambiguity: {0}")]
    IdentityAmbiguity(#[from] IdentityAmbiguity),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("cannot {operation} while workflow is {phase}")]
    InvalidTransition { operation: &'static str, phase: String },
}

impl WorkflowError {
    pub fn validation(reason: impl Into<String>) -> Self {
        WorkflowError::Validation(reason.into())
    }

    /// Whether the same call can be retried without changing its input
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::Gating(_) | WorkflowError::Persistence(_) | WorkflowError::Allocation(_)
        )
    }
}
