// Stage workflow: record types, navigation guard, stage ledger and the
// coordinator that commits transitions

pub mod coordinator;
pub mod guard;
pub mod ledger;
pub mod types;

pub use coordinator::{
    CoordinatorSettings, NewInstance, PendingTransition, TransitionChallenge, TransitionKind,
    TransitionOutcome, WorkflowCoordinator, WorkflowPhase,
};
pub use guard::{can_advance, can_view, lock_policy, ViewContext};
pub use ledger::{StageLedger, StageView};
pub use types::{
    CoSignature, IdentityOverride, InstanceId, RecordStatus, Signer, StageContent, StageLabels,
    StageSnapshot, WorkflowInstance, LAST_STAGE, STAGE_COUNT,
};
