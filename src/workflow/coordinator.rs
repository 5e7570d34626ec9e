// Workflow coordinator - the record-level state machine
//
// Drafting(i) --save--> Drafting(i)
// Drafting(i) --advance (i < N)--> Drafting(i + 1)
// Drafting(N) --finish--> Completed --reopen--> Reopened --close--> Completed
//
// Every committed transition goes through `commit`, which restores the
// pre-transition record when the change or its persistence fails.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use super::guard::ViewContext;
use super::ledger::{StageLedger, StageView};
use super::types::{
    IdentityOverride, InstanceId, RecordStatus, StageContent, StageLabels, StageSeal,
    WorkflowInstance, LAST_STAGE,
};
use crate::config::{FinishPolicy, StageGateConfig};
use crate::errors::WorkflowError;
use crate::gating::{DeferredAction, GatingAuthority, GatingChallenge, GatingError, GatingOutcome};
use crate::observability::{OperationTimer, WorkflowMetrics};
use crate::persistence::PersistenceGateway;
use crate::sequence::{ProtocolId, RecordKind, SequenceAllocator};
use crate::telemetry::{create_transition_span, generate_correlation_id};
use crate::workflow::types::VerificationStamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPhase {
    Drafting(usize),
    Completed,
    Reopened,
}

impl WorkflowPhase {
    pub fn of(instance: &WorkflowInstance) -> Self {
        if !instance.is_past_last_stage() {
            WorkflowPhase::Drafting(instance.current_stage_index)
        } else if instance.reopened {
            WorkflowPhase::Reopened
        } else {
            WorkflowPhase::Completed
        }
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowPhase::Drafting(stage) => write!(f, "drafting stage {stage}"),
            WorkflowPhase::Completed => f.write_str("completed"),
            WorkflowPhase::Reopened => f.write_str("reopened"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Advance,
    Finish,
}

impl TransitionKind {
    fn operation(&self) -> &'static str {
        match self {
            TransitionKind::Advance => "advance",
            TransitionKind::Finish => "finish",
        }
    }
}

/// An advance or finish held back by a verification challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransition {
    pub instance_id: InstanceId,
    pub from_stage: usize,
    pub kind: TransitionKind,
    pub content: StageContent,
}

#[derive(Debug, Clone)]
pub struct ResumedTransition {
    pub transition: PendingTransition,
    pub stamp: VerificationStamp,
}

impl DeferredAction for PendingTransition {
    type Output = ResumedTransition;

    fn resume(self, stamp: VerificationStamp) -> Self::Output {
        ResumedTransition {
            transition: self,
            stamp,
        }
    }
}

pub type TransitionChallenge = GatingChallenge<PendingTransition>;

#[derive(Debug)]
pub enum TransitionOutcome {
    /// Persisted; `stage` is the new active stage index
    Committed { stage: usize },
    /// Nothing applied yet; resolve or cancel the challenge
    ChallengeIssued(TransitionChallenge),
}

impl TransitionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransitionOutcome::Committed { .. })
    }
}

/// Request to open a new record
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub title: String,
    pub kind: RecordKind,
    pub scope_id: String,
    pub year: i32,
    pub digital_signature: bool,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub labels: StageLabels,
    pub finish_policy: FinishPolicy,
    pub gate_finish: bool,
    pub allow_identity_override: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            labels: StageLabels::default(),
            finish_policy: FinishPolicy::Complete,
            gate_finish: false,
            allow_identity_override: true,
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &StageGateConfig) -> Self {
        Self {
            labels: config.workflow.stage_labels.clone(),
            finish_policy: config.workflow.finish_policy,
            gate_finish: config.workflow.gate_finish,
            allow_identity_override: config.gating.allow_identity_override,
        }
    }
}

pub struct WorkflowCoordinator {
    settings: CoordinatorSettings,
    gateway: Arc<dyn PersistenceGateway>,
    allocator: SequenceAllocator,
    authority: GatingAuthority,
    metrics: Arc<WorkflowMetrics>,
}

impl WorkflowCoordinator {
    pub fn new(
        settings: CoordinatorSettings,
        gateway: Arc<dyn PersistenceGateway>,
        allocator: SequenceAllocator,
        authority: GatingAuthority,
    ) -> Self {
        Self {
            settings,
            gateway,
            allocator,
            authority,
            metrics: Arc::new(WorkflowMetrics::new()),
        }
    }

    pub fn labels(&self) -> &StageLabels {
        &self.settings.labels
    }

    pub fn metrics(&self) -> Arc<WorkflowMetrics> {
        self.metrics.clone()
    }

    pub fn phase(&self, instance: &WorkflowInstance) -> WorkflowPhase {
        WorkflowPhase::of(instance)
    }

    /// Allocate a protocol number and persist a fresh record at stage 0
    pub async fn create_instance(
        &self,
        request: NewInstance,
    ) -> Result<WorkflowInstance, WorkflowError> {
        if request.title.trim().is_empty() {
            return Err(WorkflowError::validation("title is required"));
        }

        let protocol = self
            .allocator
            .allocate(&request.kind, &request.scope_id, request.year)
            .await?;

        let instance = WorkflowInstance::new(
            &protocol.to_string(),
            request.title.trim(),
            request.scope_id.trim(),
            request.year,
        )
        .with_digital_signature(request.digital_signature);

        if let Err(e) = self.gateway.save(&instance).await {
            // the number stays consumed; it is never handed out again
            warn!(protocol = %protocol, error = %e, "Record creation failed after allocation");
            return Err(e.into());
        }

        info!(
            instance_id = %instance.id,
            protocol = %instance.protocol,
            digital_signature = instance.digital_signature,
            "Record created"
        );
        Ok(instance)
    }

    /// Non-binding preview of the next protocol identifier
    pub async fn suggest_protocol(
        &self,
        kind: &RecordKind,
        scope_id: &str,
        year: i32,
    ) -> Result<ProtocolId, WorkflowError> {
        Ok(self.allocator.suggest(kind, scope_id, year).await?)
    }

    pub async fn load(&self, id: &InstanceId) -> Result<WorkflowInstance, WorkflowError> {
        Ok(self.gateway.load(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<InstanceId>, WorkflowError> {
        Ok(self.gateway.list().await?)
    }

    /// Navigate; not persisted
    pub fn view_stage(
        &self,
        instance: &mut WorkflowInstance,
        index: usize,
        context: ViewContext,
    ) -> Result<StageView, WorkflowError> {
        Ok(StageLedger::new(instance, &self.settings.labels).view_stage(index, context)?)
    }

    pub async fn save(
        &self,
        instance: &mut WorkflowInstance,
        content: StageContent,
    ) -> Result<(), WorkflowError> {
        if let WorkflowPhase::Completed = self.phase(instance) {
            return Err(self.invalid("save", instance));
        }
        if content.is_empty() {
            return Err(WorkflowError::validation("nothing to save"));
        }

        let labels = &self.settings.labels;
        self.commit(instance, "save", move |record| {
            StageLedger::new(record, labels).save_current_stage(content)?;
            Ok(())
        })
        .await
    }

    pub async fn advance(
        &self,
        instance: &mut WorkflowInstance,
        content: StageContent,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.ensure_can_advance(instance)?;
        content.validate_for_advance()?;
        let gated = instance.current_stage_index == 0 && instance.digital_signature;
        self.begin(instance, TransitionKind::Advance, content, gated).await
    }

    /// Close the last stage. `confirmed` is the user's explicit confirmation.
    pub async fn finish(
        &self,
        instance: &mut WorkflowInstance,
        content: StageContent,
        confirmed: bool,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.ensure_can_finish(instance, confirmed)?;
        content.validate_for_advance()?;
        let gated = self.settings.gate_finish && instance.digital_signature;
        self.begin(instance, TransitionKind::Finish, content, gated).await
    }

    /// Advance after the caller confirmed proceeding despite an unresolvable signer.
    ///
    /// A signer that does resolve still gets a challenge.
    pub async fn advance_with_override(
        &self,
        instance: &mut WorkflowInstance,
        content: StageContent,
        identity_override: IdentityOverride,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.ensure_can_advance(instance)?;
        content.validate_for_advance()?;
        self.begin_with_override(instance, TransitionKind::Advance, content, identity_override)
            .await
    }

    pub async fn finish_with_override(
        &self,
        instance: &mut WorkflowInstance,
        content: StageContent,
        confirmed: bool,
        identity_override: IdentityOverride,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.ensure_can_finish(instance, confirmed)?;
        content.validate_for_advance()?;
        self.begin_with_override(instance, TransitionKind::Finish, content, identity_override)
            .await
    }

    pub async fn resolve_challenge(
        &self,
        instance: &mut WorkflowInstance,
        challenge: &mut TransitionChallenge,
        code: &str,
    ) -> Result<usize, WorkflowError> {
        self.resolve_challenge_at(instance, challenge, code, Utc::now())
            .await
    }

    /// Verify `code` as of `at` and, on success, commit the held-back transition
    pub async fn resolve_challenge_at(
        &self,
        instance: &mut WorkflowInstance,
        challenge: &mut TransitionChallenge,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, WorkflowError> {
        let pending = challenge.action().ok_or(GatingError::AlreadyResolved)?;
        if pending.instance_id != instance.id {
            return Err(GatingError::StaleChallenge {
                reason: format!("issued for record {}", pending.instance_id),
            }
            .into());
        }
        if pending.from_stage != instance.current_stage_index {
            return Err(GatingError::StaleChallenge {
                reason: format!(
                    "issued at stage {}, record is at stage {}",
                    pending.from_stage, instance.current_stage_index
                ),
            }
            .into());
        }

        let resumed = match self.authority.resolve_challenge_at(challenge, code, at) {
            Ok(resumed) => resumed,
            Err(e) => {
                self.metrics.record_challenge_failed();
                return Err(e.into());
            }
        };
        let ResumedTransition { transition, stamp } = resumed;
        let result = self
            .apply(
                instance,
                transition.clone(),
                StageSeal::verified(stamp.clone()),
            )
            .await;
        if result.is_err() {
            // record was rolled back; keep the verified challenge for a retry
            challenge.reinstate(transition, stamp);
        }
        result
    }

    /// Abandon a challenge; the record is untouched
    pub fn cancel_challenge(&self, challenge: TransitionChallenge) {
        challenge.cancel();
    }

    pub async fn reopen(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        if self.phase(instance) != WorkflowPhase::Completed
            || instance.status != RecordStatus::Completed
        {
            return Err(self.invalid("reopen", instance));
        }
        let labels = &self.settings.labels;
        self.commit(instance, "reopen", move |record| {
            StageLedger::new(record, labels).reopen()?;
            Ok(())
        })
        .await
    }

    pub async fn close_reopen(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        if self.phase(instance) != WorkflowPhase::Reopened {
            return Err(self.invalid("close", instance));
        }
        let labels = &self.settings.labels;
        self.commit(instance, "close", move |record| {
            StageLedger::new(record, labels).close_reopen()?;
            Ok(())
        })
        .await
    }

    pub async fn submit_for_approval(
        &self,
        instance: &mut WorkflowInstance,
    ) -> Result<(), WorkflowError> {
        self.change_status(
            instance,
            "submit",
            &[RecordStatus::Drafting, RecordStatus::Rejected],
            RecordStatus::AwaitingApproval,
        )
        .await
    }

    pub async fn approve(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        self.change_status(
            instance,
            "approve",
            &[RecordStatus::AwaitingApproval],
            RecordStatus::Approved,
        )
        .await
    }

    pub async fn reject(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        self.change_status(
            instance,
            "reject",
            &[RecordStatus::AwaitingApproval],
            RecordStatus::Rejected,
        )
        .await
    }

    /// Settle a record left `finishing` by the finish policy
    pub async fn confirm_completion(
        &self,
        instance: &mut WorkflowInstance,
    ) -> Result<(), WorkflowError> {
        if !instance.is_past_last_stage() {
            return Err(self.invalid("confirm completion", instance));
        }
        self.change_status(
            instance,
            "confirm completion",
            &[RecordStatus::Finishing],
            RecordStatus::Completed,
        )
        .await
    }

    fn ensure_can_advance(&self, instance: &WorkflowInstance) -> Result<(), WorkflowError> {
        match self.phase(instance) {
            WorkflowPhase::Drafting(stage) if stage < LAST_STAGE => Ok(()),
            _ => Err(self.invalid("advance", instance)),
        }
    }

    fn ensure_can_finish(
        &self,
        instance: &WorkflowInstance,
        confirmed: bool,
    ) -> Result<(), WorkflowError> {
        if self.phase(instance) != WorkflowPhase::Drafting(LAST_STAGE) {
            return Err(self.invalid("finish", instance));
        }
        if !confirmed {
            return Err(WorkflowError::validation("finishing requires explicit confirmation"));
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str, instance: &WorkflowInstance) -> WorkflowError {
        WorkflowError::InvalidTransition {
            operation,
            phase: self.phase(instance).to_string(),
        }
    }

    async fn begin(
        &self,
        instance: &mut WorkflowInstance,
        kind: TransitionKind,
        content: StageContent,
        gated: bool,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let pending = PendingTransition {
            instance_id: instance.id,
            from_stage: instance.current_stage_index,
            kind,
            content,
        };
        if !gated {
            let stage = self.apply(instance, pending, StageSeal::default()).await?;
            return Ok(TransitionOutcome::Committed { stage });
        }

        match self.evaluate_signer(pending)? {
            GatingOutcome::Proceed(pending) => {
                let stage = self.apply(instance, pending, StageSeal::default()).await?;
                Ok(TransitionOutcome::Committed { stage })
            }
            GatingOutcome::Challenge(challenge) => {
                self.metrics.record_challenge_issued();
                Ok(TransitionOutcome::ChallengeIssued(challenge))
            }
        }
    }

    async fn begin_with_override(
        &self,
        instance: &mut WorkflowInstance,
        kind: TransitionKind,
        content: StageContent,
        identity_override: IdentityOverride,
    ) -> Result<TransitionOutcome, WorkflowError> {
        if !self.settings.allow_identity_override {
            return Err(WorkflowError::validation("identity overrides are disabled"));
        }
        if identity_override.confirmed_by.trim().is_empty() {
            return Err(WorkflowError::validation("override must name who confirmed it"));
        }

        let pending = PendingTransition {
            instance_id: instance.id,
            from_stage: instance.current_stage_index,
            kind,
            content,
        };

        match self.evaluate_signer(pending.clone()) {
            Ok(GatingOutcome::Challenge(challenge)) => {
                self.metrics.record_challenge_issued();
                Ok(TransitionOutcome::ChallengeIssued(challenge))
            }
            Ok(GatingOutcome::Proceed(pending)) => {
                let stage = self.apply(instance, pending, StageSeal::default()).await?;
                Ok(TransitionOutcome::Committed { stage })
            }
            Err(WorkflowError::IdentityAmbiguity(ambiguity)) => {
                warn!(
                    instance_id = %instance.id,
                    stage = instance.current_stage_index,
                    signer = %ambiguity.signer,
                    reason = %ambiguity.reason,
                    confirmed_by = %identity_override.confirmed_by,
                    override_reason = %identity_override.reason,
                    "Proceeding without verification on caller override"
                );
                self.metrics.record_identity_override();
                let stage = self
                    .apply(instance, pending, StageSeal::overridden(identity_override))
                    .await?;
                Ok(TransitionOutcome::Committed { stage })
            }
            Err(other) => Err(other),
        }
    }

    fn evaluate_signer(
        &self,
        pending: PendingTransition,
    ) -> Result<GatingOutcome<PendingTransition>, WorkflowError> {
        let signer = pending.content.signer.clone();
        if signer.name.trim().is_empty() {
            return Err(WorkflowError::validation(
                "signer name is required for a verified stage",
            ));
        }
        self.authority
            .evaluate(&signer.name, signer.role_hint(), pending)
            .map_err(|ambiguity| {
                warn!(signer = %ambiguity.signer, reason = %ambiguity.reason, "Signer not resolved");
                WorkflowError::IdentityAmbiguity(ambiguity)
            })
    }

    async fn apply(
        &self,
        instance: &mut WorkflowInstance,
        pending: PendingTransition,
        seal: StageSeal,
    ) -> Result<usize, WorkflowError> {
        let labels = &self.settings.labels;
        let finished_status = match self.settings.finish_policy {
            FinishPolicy::Complete => RecordStatus::Completed,
            FinishPolicy::MarkFinishing => RecordStatus::Finishing,
        };
        let kind = pending.kind;

        self.commit(instance, kind.operation(), move |record| {
            let stage = StageLedger::new(record, labels).advance(pending.content, seal)?;
            match kind {
                TransitionKind::Advance if record.status == RecordStatus::Approved => {
                    record.status = RecordStatus::InProgress;
                }
                TransitionKind::Advance => {}
                TransitionKind::Finish => record.status = finished_status,
            }
            Ok(stage)
        })
        .await
    }

    async fn change_status(
        &self,
        instance: &mut WorkflowInstance,
        operation: &'static str,
        allowed_from: &[RecordStatus],
        to: RecordStatus,
    ) -> Result<(), WorkflowError> {
        if !allowed_from.contains(&instance.status) {
            return Err(WorkflowError::InvalidTransition {
                operation,
                phase: format!("{} ({})", self.phase(instance), instance.status),
            });
        }
        self.commit(instance, operation, move |record| {
            record.status = to;
            Ok(())
        })
        .await
    }

    /// Apply `change` to the live record and persist it. On any failure the
    /// record is restored to its exact pre-call state.
    async fn commit<T, F>(
        &self,
        instance: &mut WorkflowInstance,
        operation: &'static str,
        change: F,
    ) -> Result<T, WorkflowError>
    where
        F: FnOnce(&mut WorkflowInstance) -> Result<T, WorkflowError>,
    {
        let correlation_id = generate_correlation_id();
        let instance_id = instance.id.to_string();
        let span = create_transition_span(
            operation,
            Some(&instance_id),
            Some(instance.current_stage_index),
            Some(&correlation_id),
        );
        let timer = OperationTimer::new(operation);
        let before = instance.clone();

        let result = async {
            let value = change(instance)?;
            instance.updated_at = Utc::now();
            self.gateway.save(instance).await?;
            Ok::<T, WorkflowError>(value)
        }
        .instrument(span.clone())
        .await;

        let _entered = span.enter();
        match result {
            Ok(value) => {
                self.metrics.record_commit();
                info!(
                    instance_id = %instance.id,
                    stage = instance.current_stage_index,
                    status = %instance.status,
                    "Transition committed"
                );
                timer.finish();
                Ok(value)
            }
            Err(e) => {
                *instance = before;
                self.metrics.record_rollback();
                warn!(instance_id = %instance.id, error = %e, "Transition rolled back");
                Err(e)
            }
        }
    }
}
