// Scope-and-year sequence numbering for protocol identifiers

pub mod allocator;
pub mod store;

use thiserror::Error;

pub use allocator::{ProtocolId, RecordKind, SequenceAllocator};
pub use store::{FileSequenceStore, InMemorySequenceStore, SequenceKey, SequenceStore};

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("sequence storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sequence file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("sequence storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("sequence for {key} is exhausted")]
    Exhausted { key: SequenceKey },

    #[error("invalid sequence scope: {reason}")]
    InvalidScope { reason: String },
}
