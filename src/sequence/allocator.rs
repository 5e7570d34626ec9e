use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{error, info};

use super::store::{SequenceKey, SequenceStore};
use super::AllocationError;

static PROTOCOL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9]*)-(\d{3,})/(\d{4})$").expect("protocol pattern is valid")
});

/// Record type, which decides the protocol prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordKind(String);

impl RecordKind {
    pub fn new(prefix: &str) -> Result<Self, AllocationError> {
        let prefix = prefix.trim().to_ascii_uppercase();
        let valid = prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && prefix.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(AllocationError::InvalidScope {
                reason: format!("'{prefix}' is not a valid protocol prefix"),
            });
        }
        Ok(Self(prefix))
    }

    /// Procurement commission records
    pub fn commission() -> Self {
        Self("COM".to_string())
    }

    pub fn prefix(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecordKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RecordKind::new(&value).map_err(|e| e.to_string())
    }
}

impl From<RecordKind> for String {
    fn from(kind: RecordKind) -> Self {
        kind.0
    }
}

/// Human-readable protocol identifier, `PREFIX-NNN/YYYY`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolId {
    pub prefix: String,
    pub number: u64,
    pub year: i32,
}

impl ProtocolId {
    pub fn new(kind: &RecordKind, number: u64, year: i32) -> Self {
        Self {
            prefix: kind.prefix().to_string(),
            number,
            year,
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let captures = PROTOCOL_PATTERN.captures(input.trim())?;
        Some(Self {
            prefix: captures.get(1)?.as_str().to_string(),
            number: captures.get(2)?.as_str().parse().ok()?,
            year: captures.get(3)?.as_str().parse().ok()?,
        })
    }
}

impl std::fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:03}/{}", self.prefix, self.number, self.year)
    }
}

/// Mints sequence numbers through an atomic store
#[derive(Clone)]
pub struct SequenceAllocator {
    store: Arc<dyn SequenceStore>,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self { store }
    }

    /// Current counter value. Not a reservation.
    pub async fn peek(&self, scope_id: &str, year: i32) -> Result<u64, AllocationError> {
        let key = SequenceKey::new(scope_id, year)?;
        self.store.peek(&key).await
    }

    pub async fn increment(&self, scope_id: &str, year: i32) -> Result<u64, AllocationError> {
        let key = SequenceKey::new(scope_id, year)?;
        match self.store.increment(&key).await {
            Ok(value) => {
                info!(key = %key, value, "Sequence number allocated");
                Ok(value)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Sequence allocation failed");
                Err(e)
            }
        }
    }

    /// The identifier the next allocation would probably produce
    pub async fn suggest(
        &self,
        kind: &RecordKind,
        scope_id: &str,
        year: i32,
    ) -> Result<ProtocolId, AllocationError> {
        let current = self.peek(scope_id, year).await?;
        Ok(ProtocolId::new(kind, current.saturating_add(1), year))
    }

    /// Allocate a number and format it as a protocol identifier
    pub async fn allocate(
        &self,
        kind: &RecordKind,
        scope_id: &str,
        year: i32,
    ) -> Result<ProtocolId, AllocationError> {
        let number = self.increment(scope_id, year).await?;
        Ok(ProtocolId::new(kind, number, year))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::store::{InMemorySequenceStore, MockSequenceStore};

    #[tokio::test]
    async fn test_peek_increment_and_format() {
        let store = Arc::new(InMemorySequenceStore::new());
        store.seed(SequenceKey::new("sector-7", 2024).unwrap(), 5).await;
        let allocator = SequenceAllocator::new(store);

        assert_eq!(allocator.peek("sector-7", 2024).await.unwrap(), 5);
        let next = allocator.increment("sector-7", 2024).await.unwrap();
        assert_eq!(next, 6);
        assert_eq!(
            ProtocolId::new(&RecordKind::commission(), next, 2024).to_string(),
            "COM-006/2024"
        );
    }

    #[tokio::test]
    async fn test_suggest_does_not_consume() {
        let allocator = SequenceAllocator::new(Arc::new(InMemorySequenceStore::new()));
        let kind = RecordKind::commission();
        let first = allocator.suggest(&kind, "sector-7", 2024).await.unwrap();
        let second = allocator.suggest(&kind, "sector-7", 2024).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_string(), "COM-001/2024");

        let allocated = allocator.allocate(&kind, "sector-7", 2024).await.unwrap();
        assert_eq!(allocated, first);
    }

    #[tokio::test]
    async fn test_storage_failure_is_surfaced() {
        let mut store = MockSequenceStore::new();
        store.expect_increment().returning(|_| {
            Err(AllocationError::Unavailable {
                reason: "connection reset".to_string(),
            })
        });
        let allocator = SequenceAllocator::new(Arc::new(store));
        assert!(matches!(
            allocator.increment("sector-7", 2024).await,
            Err(AllocationError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_numbers_wider_than_three_digits_are_not_truncated() {
        let id = ProtocolId::new(&RecordKind::commission(), 1234, 2025);
        assert_eq!(id.to_string(), "COM-1234/2025");
    }

    #[test]
    fn test_protocol_parse() {
        let id = ProtocolId::parse("COM-006/2024").unwrap();
        assert_eq!(id.prefix, "COM");
        assert_eq!(id.number, 6);
        assert_eq!(id.year, 2024);
        assert!(ProtocolId::parse("COM-6/2024").is_none());
        assert!(ProtocolId::parse("com-006/2024").is_none());
        assert!(ProtocolId::parse("COM-006-2024").is_none());
    }

    #[test]
    fn test_record_kind_validation() {
        assert_eq!(RecordKind::new("prc").unwrap().prefix(), "PRC");
        assert!(RecordKind::new("").is_err());
        assert!(RecordKind::new("9AB").is_err());
        assert!(RecordKind::new("A-B").is_err());
    }
}
