// Stagegate Library - staged approval records with verified signatures
// This exposes the core components for the CLI and for integration tests

pub mod cli;
pub mod config;
pub mod database;
pub mod errors;
pub mod gating;
pub mod observability;
pub mod persistence;
pub mod sequence;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use config::{FinishPolicy, StageGateConfig};
pub use database::{open_backends, StorageBackends};
pub use errors::{AmbiguityReason, GuardRejection, IdentityAmbiguity, WorkflowError};
pub use gating::{GatingAuthority, GatingChallenge, GatingError, InMemoryDirectory, TotpParams};
pub use observability::{OperationTimer, WorkflowMetrics, WorkflowStats};
pub use persistence::{FileSystemGateway, InMemoryGateway, PersistenceError, PersistenceGateway};
pub use sequence::{AllocationError, ProtocolId, RecordKind, SequenceAllocator, SequenceStore};
pub use telemetry::{create_transition_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflow::{
    CoordinatorSettings, NewInstance, TransitionOutcome, WorkflowCoordinator, WorkflowInstance,
    WorkflowPhase,
};
