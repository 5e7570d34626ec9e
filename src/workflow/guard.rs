// Advancement guard - pure navigation policy

use serde::{Deserialize, Serialize};

use super::types::{RecordStatus, ALWAYS_VISIBLE_STAGE, LAST_STAGE, STAGE_COUNT};
use crate::errors::GuardRejection;

/// Screen a record is being looked at from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewContext {
    /// The owner following their own record
    OwnerTracking,
    /// A screener working through records awaiting approval
    ScreeningQueue,
    /// The stage author editing the record
    Editor,
}

/// Whether navigation is restricted to the always-visible stage
pub fn lock_policy(status: RecordStatus, context: ViewContext) -> bool {
    match context {
        ViewContext::OwnerTracking => matches!(
            status,
            RecordStatus::AwaitingApproval
                | RecordStatus::Approved
                | RecordStatus::InProgress
                | RecordStatus::Finishing
                | RecordStatus::Completed
        ),
        ViewContext::ScreeningQueue => status == RecordStatus::AwaitingApproval,
        ViewContext::Editor => false,
    }
}

/// Decide whether `target` may be shown.
///
/// `status` is only used to describe a lock rejection.
pub fn can_view(
    target: usize,
    current_stage_index: usize,
    locked: bool,
    status: RecordStatus,
) -> Result<(), GuardRejection> {
    if target >= STAGE_COUNT {
        return Err(GuardRejection::NoSuchStage { target });
    }
    if target > current_stage_index {
        return Err(GuardRejection::NotYetReached {
            target,
            current: current_stage_index,
        });
    }
    if locked && target != ALWAYS_VISIBLE_STAGE {
        return Err(GuardRejection::Locked { target, status });
    }
    Ok(())
}

pub fn can_advance(current_stage_index: usize, last_stage: usize) -> bool {
    current_stage_index <= last_stage
}

pub fn ensure_can_advance(current_stage_index: usize) -> Result<(), GuardRejection> {
    if can_advance(current_stage_index, LAST_STAGE) {
        Ok(())
    } else {
        Err(GuardRejection::StagesExhausted {
            current: current_stage_index,
        })
    }
}
