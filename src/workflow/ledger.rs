// Stage ledger - per-record history, draft buffer and navigation

use chrono::Utc;
use tracing::debug;

use super::guard::{can_view, ensure_can_advance, lock_policy, ViewContext};
use super::types::{
    StageContent, StageLabels, StageSeal, StageSnapshot, WorkflowInstance, LAST_STAGE, STAGE_COUNT,
};
use crate::errors::GuardRejection;

/// What the shell should render for the viewed stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageView {
    pub index: usize,
    pub label: String,
    pub content: StageContent,
    pub read_only: bool,
    pub verified: bool,
}

/// Stage operations over a single record.
///
/// The ledger never persists anything; it only computes the next in-memory
/// state of the record it borrows.
pub struct StageLedger<'a> {
    instance: &'a mut WorkflowInstance,
    labels: &'a StageLabels,
}

impl<'a> StageLedger<'a> {
    pub fn new(instance: &'a mut WorkflowInstance, labels: &'a StageLabels) -> Self {
        Self { instance, labels }
    }

    pub fn view_stage(
        &mut self,
        index: usize,
        context: ViewContext,
    ) -> Result<StageView, GuardRejection> {
        let locked = lock_policy(self.instance.status, context);
        can_view(
            index,
            self.instance.current_stage_index,
            locked,
            self.instance.status,
        )?;

        let view = if index == self.instance.current_stage_index {
            StageView {
                index,
                label: self.labels.label(index).to_string(),
                content: self
                    .instance
                    .active_draft
                    .as_ref()
                    .map(StageSnapshot::content)
                    .unwrap_or_default(),
                read_only: false,
                verified: false,
            }
        } else {
            let snapshot = self
                .instance
                .stage_history
                .get(index)
                .ok_or(GuardRejection::NoSuchStage { target: index })?;
            StageView {
                index,
                label: snapshot.label.clone(),
                content: snapshot.content(),
                read_only: !self.is_editable_trailing_stage(index),
                verified: snapshot.verification.is_some(),
            }
        };

        self.instance.viewing_stage_index = index;
        debug!(
            instance_id = %self.instance.id,
            stage = index,
            read_only = view.read_only,
            "Viewing stage"
        );
        Ok(view)
    }

    /// Store `content` against the viewed stage without advancing.
    ///
    /// On the active stage this refreshes the draft buffer. A frozen stage can
    /// only be rewritten when it is the trailing stage of a reopened record.
    pub fn save_current_stage(&mut self, content: StageContent) -> Result<(), GuardRejection> {
        let viewing = self.instance.viewing_stage_index;
        let current = self.instance.current_stage_index;

        if viewing > current {
            return Err(GuardRejection::NotYetReached {
                target: viewing,
                current,
            });
        }

        if viewing == current && current <= LAST_STAGE {
            let mut draft = StageSnapshot::from_content(self.labels.label(current), content);
            if let Some(previous) = &self.instance.active_draft {
                draft.created_at = previous.created_at;
                draft.revised_at = Some(Utc::now());
            }
            self.instance.active_draft = Some(draft);
            return Ok(());
        }

        if self.is_editable_trailing_stage(viewing) {
            if let Some(snapshot) = self.instance.stage_history.get_mut(viewing) {
                snapshot.body = content.body;
                snapshot.signer = content.signer;
                snapshot.co_signatures = content.co_signatures;
                snapshot.revised_at = Some(Utc::now());
                return Ok(());
            }
        }

        Err(GuardRejection::StageFrozen { index: viewing })
    }

    /// Freeze `content` as the active stage and move to the next one.
    ///
    /// Returns the new active stage index.
    pub fn advance(&mut self, content: StageContent, seal: StageSeal) -> Result<usize, GuardRejection> {
        let current = self.instance.current_stage_index;
        ensure_can_advance(current)?;

        let snapshot = StageSnapshot::from_content(self.labels.label(current), content).sealed(seal);
        self.instance.stage_history.push(snapshot);
        self.instance.current_stage_index = current + 1;
        self.instance.viewing_stage_index = (current + 1).min(LAST_STAGE);
        self.instance.active_draft = None;

        debug!(
            instance_id = %self.instance.id,
            from_stage = current,
            to_stage = current + 1,
            "Stage frozen into history"
        );
        Ok(current + 1)
    }

    /// Allow edits to the trailing stage of a completed record
    pub fn reopen(&mut self) -> Result<(), GuardRejection> {
        self.ensure_past_last_stage()?;
        self.instance.reopened = true;
        self.instance.viewing_stage_index = LAST_STAGE;
        Ok(())
    }

    pub fn close_reopen(&mut self) -> Result<(), GuardRejection> {
        self.ensure_past_last_stage()?;
        self.instance.reopened = false;
        Ok(())
    }

    /// Editable content of the active stage, if any
    pub fn active_content(&self) -> Option<StageContent> {
        self.instance.active_draft.as_ref().map(StageSnapshot::content)
    }

    fn ensure_past_last_stage(&self) -> Result<(), GuardRejection> {
        if self.instance.is_past_last_stage() {
            Ok(())
        } else {
            Err(GuardRejection::NotYetReached {
                target: STAGE_COUNT,
                current: self.instance.current_stage_index,
            })
        }
    }

    fn is_editable_trailing_stage(&self, index: usize) -> bool {
        self.instance.reopened && self.instance.is_past_last_stage() && index == LAST_STAGE
    }
}
