// Core record types for the stage workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::WorkflowError;

/// Index of the last stage (N). Stages are numbered 0..=LAST_STAGE.
pub const LAST_STAGE: usize = 6;

/// Number of stages every record moves through
pub const STAGE_COUNT: usize = LAST_STAGE + 1;

/// The stage that stays visible under a navigation lock
pub const ALWAYS_VISIBLE_STAGE: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(InstanceId)
    }
}

/// Record status as seen by owners and screeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Drafting,
    AwaitingApproval,
    Approved,
    Rejected,
    InProgress,
    Finishing,
    Completed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Drafting => "drafting",
            RecordStatus::AwaitingApproval => "awaiting_approval",
            RecordStatus::Approved => "approved",
            RecordStatus::Rejected => "rejected",
            RecordStatus::InProgress => "in_progress",
            RecordStatus::Finishing => "finishing",
            RecordStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Person responsible for a stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub name: String,
    pub role: String,
    pub sector: String,
}

impl Signer {
    pub fn new(name: &str, role: &str, sector: &str) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
            sector: sector.to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty() && self.role.trim().is_empty() && self.sector.trim().is_empty()
    }

    /// Role to hand to identity resolution, if one was given
    pub fn role_hint(&self) -> Option<&str> {
        let role = self.role.trim();
        (!role.is_empty()).then_some(role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoSignature {
    pub name: String,
    pub role: String,
}

/// The editable fields of a stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageContent {
    pub body: String,
    pub signer: Signer,
    #[serde(default)]
    pub co_signatures: Vec<CoSignature>,
}

impl StageContent {
    pub fn with_body(body: &str) -> Self {
        Self {
            body: body.to_string(),
            ..Default::default()
        }
    }

    pub fn signed_by(mut self, signer: Signer) -> Self {
        self.signer = signer;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty() && self.signer.is_blank() && self.co_signatures.is_empty()
    }

    /// Fields a stage must carry before it can be frozen into history
    pub fn validate_for_advance(&self) -> Result<(), WorkflowError> {
        if self.body.trim().is_empty() {
            return Err(WorkflowError::validation("stage body is required"));
        }
        if let Some(co) = self.co_signatures.iter().find(|c| c.name.trim().is_empty()) {
            return Err(WorkflowError::validation(format!(
                "co-signature with role '{}' has no name",
                co.role
            )));
        }
        Ok(())
    }
}

/// Identity a verification was performed for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub name: String,
    pub role: String,
    pub sector: String,
}

/// Metadata attached to a snapshot produced by a verified transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStamp {
    pub method: String,
    pub verified_at: DateTime<Utc>,
    pub identity: ResolvedIdentity,
}

/// Caller confirmation to proceed without verification after an identity ambiguity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityOverride {
    pub confirmed_by: String,
    pub reason: String,
    pub confirmed_at: DateTime<Utc>,
}

impl IdentityOverride {
    pub fn new(confirmed_by: &str, reason: &str) -> Self {
        Self {
            confirmed_by: confirmed_by.to_string(),
            reason: reason.to_string(),
            confirmed_at: Utc::now(),
        }
    }
}

/// How a snapshot was authorised on its way into history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSeal {
    pub verification: Option<VerificationStamp>,
    pub identity_override: Option<IdentityOverride>,
}

impl StageSeal {
    pub fn verified(stamp: VerificationStamp) -> Self {
        Self {
            verification: Some(stamp),
            identity_override: None,
        }
    }

    pub fn overridden(identity_override: IdentityOverride) -> Self {
        Self {
            verification: None,
            identity_override: Some(identity_override),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub label: String,
    pub body: String,
    pub signer: Signer,
    #[serde(default)]
    pub co_signatures: Vec<CoSignature>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revised_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verification: Option<VerificationStamp>,
    #[serde(default)]
    pub identity_override: Option<IdentityOverride>,
}

impl StageSnapshot {
    pub fn from_content(label: &str, content: StageContent) -> Self {
        Self {
            label: label.to_string(),
            body: content.body,
            signer: content.signer,
            co_signatures: content.co_signatures,
            created_at: Utc::now(),
            revised_at: None,
            verification: None,
            identity_override: None,
        }
    }

    pub fn sealed(mut self, seal: StageSeal) -> Self {
        self.verification = seal.verification;
        self.identity_override = seal.identity_override;
        self
    }

    pub fn content(&self) -> StageContent {
        StageContent {
            body: self.body.clone(),
            signer: self.signer.clone(),
            co_signatures: self.co_signatures.clone(),
        }
    }
}

/// One multi-stage approval record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub protocol: String,
    pub title: String,
    pub scope_id: String,
    pub year: i32,
    /// Stage 0 signer must pass verification before the first advance
    pub digital_signature: bool,
    pub current_stage_index: usize,
    pub viewing_stage_index: usize,
    /// Frozen stages; always holds exactly `current_stage_index` entries
    pub stage_history: Vec<StageSnapshot>,
    pub active_draft: Option<StageSnapshot>,
    pub status: RecordStatus,
    pub reopened: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(protocol: &str, title: &str, scope_id: &str, year: i32) -> Self {
        let now = Utc::now();
        Self {
            id: InstanceId::new(),
            protocol: protocol.to_string(),
            title: title.to_string(),
            scope_id: scope_id.to_string(),
            year,
            digital_signature: false,
            current_stage_index: 0,
            viewing_stage_index: 0,
            stage_history: Vec::new(),
            active_draft: None,
            status: RecordStatus::Drafting,
            reopened: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_digital_signature(mut self, required: bool) -> Self {
        self.digital_signature = required;
        self
    }

    /// True once the record has moved past the last stage
    pub fn is_past_last_stage(&self) -> bool {
        self.current_stage_index > LAST_STAGE
    }

    pub fn snapshot(&self, index: usize) -> Option<&StageSnapshot> {
        self.stage_history.get(index)
    }
}

/// Fixed, ordered stage labels supplied by the shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct StageLabels(Vec<String>);

impl StageLabels {
    pub fn new(labels: Vec<String>) -> Result<Self, WorkflowError> {
        if labels.len() != STAGE_COUNT {
            return Err(WorkflowError::validation(format!(
                "expected {STAGE_COUNT} stage labels, got {}",
                labels.len()
            )));
        }
        if let Some(pos) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(WorkflowError::validation(format!("stage label {pos} is blank")));
        }
        Ok(Self(labels))
    }

    /// Label for a stage index, falling back to a generic name past the end
    pub fn label(&self, index: usize) -> &str {
        self.0.get(index).map(String::as_str).unwrap_or("Stage")
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for StageLabels {
    fn default() -> Self {
        Self(
            [
                "Demand Formalization",
                "Preliminary Technical Study",
                "Risk Map",
                "Terms of Reference",
                "Price Survey",
                "Legal Opinion",
                "Ratification",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }
}

impl TryFrom<Vec<String>> for StageLabels {
    type Error = String;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        StageLabels::new(labels).map_err(|e| e.to_string())
    }
}

impl From<StageLabels> for Vec<String> {
    fn from(labels: StageLabels) -> Self {
        labels.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_starts_at_stage_zero() {
        let instance = WorkflowInstance::new("COM-001/2024", "Office supplies", "sector-7", 2024);
        assert_eq!(instance.current_stage_index, 0);
        assert_eq!(instance.viewing_stage_index, 0);
        assert!(instance.stage_history.is_empty());
        assert!(instance.active_draft.is_none());
        assert_eq!(instance.status, RecordStatus::Drafting);
        assert!(!instance.reopened);
    }

    #[test]
    fn test_stage_labels_require_exact_count() {
        assert!(StageLabels::new(vec!["a".to_string(); STAGE_COUNT]).is_ok());
        assert!(StageLabels::new(vec!["a".to_string(); STAGE_COUNT - 1]).is_err());

        let mut labels = vec!["a".to_string(); STAGE_COUNT];
        labels[3] = "  ".to_string();
        assert!(StageLabels::new(labels).is_err());
    }

    #[test]
    fn test_advance_validation() {
        assert!(StageContent::with_body("  ").validate_for_advance().is_err());
        assert!(StageContent::with_body("Scope").validate_for_advance().is_ok());

        let mut content = StageContent::with_body("Scope");
        content.co_signatures.push(CoSignature {
            name: String::new(),
            role: "Reviewer".to_string(),
        });
        assert!(content.validate_for_advance().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RecordStatus::AwaitingApproval).unwrap();
        assert_eq!(json, "\"awaiting_approval\"");
    }
}
